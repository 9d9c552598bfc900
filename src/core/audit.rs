//! Hash-chained audit logs.
//!
//! Every component writes an append-only JSON Lines log. Each entry carries
//! `parentHash` (the previous entry's `eventHash`, `null` for the first) and
//! `eventHash`, the SHA-256 of the canonical JSON of the entry computed after
//! `parentHash` is set and before `eventHash` is attached.
//!
//! Canonical JSON sorts object keys, uses `", "` and `": "` separators,
//! escapes control characters and every non-ASCII character as `\uXXXX`,
//! and prints floats in shortest round-trip form with two-digit exponents
//! (`1e-07`, `1e+16`).

use std::fmt::Write as _;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::{EngineError, EngineResult};
use crate::util::clock::SharedClock;

/// Key holding the previous entry's hash.
pub const PARENT_HASH: &str = "parentHash";
/// Key holding this entry's hash.
pub const EVENT_HASH: &str = "eventHash";

/// Line-oriented storage behind a [`HashChainLog`].
pub trait LogStore: Send {
    /// Append one serialized entry.
    fn append(&mut self, line: &str) -> EngineResult<()>;
    /// Read every stored entry in order.
    fn read_lines(&self) -> EngineResult<Vec<String>>;
}

/// In-memory store. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with direct access to the raw lines.
    pub fn with_lines<R>(&self, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
        let mut lines = self.lines.lock();
        f(&mut lines)
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, line: &str) -> EngineResult<()> {
        self.lines.lock().push(line.to_owned());
        Ok(())
    }

    fn read_lines(&self) -> EngineResult<Vec<String>> {
        Ok(self.lines.lock().clone())
    }
}

/// File-backed store writing one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlLogStore {
    path: PathBuf,
}

impl JsonlLogStore {
    /// Open (or create the parent directory for) a JSONL log at `path`.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for JsonlLogStore {
    fn append(&mut self, line: &str) -> EngineResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_lines(&self) -> EngineResult<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

/// Outcome of [`HashChainLog::verify_hash_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every link matched.
    Intact {
        /// Number of verified entries.
        entries: usize,
    },
    /// First break found.
    Broken {
        /// Zero-based index of the offending entry.
        index: usize,
        /// What did not match.
        reason: String,
    },
}

impl ChainStatus {
    /// True when no break was found.
    pub const fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }

    /// Convert a break into [`EngineError::HashChainCorruption`].
    pub fn into_result(self) -> EngineResult<usize> {
        match self {
            Self::Intact { entries } => Ok(entries),
            Self::Broken { index, reason } => Err(EngineError::HashChainCorruption { index, reason }),
        }
    }
}

/// Append-only hash-chained log.
pub struct HashChainLog {
    name: String,
    store: Box<dyn LogStore>,
    last_hash: Option<String>,
    len: usize,
    clock: SharedClock,
}

impl std::fmt::Debug for HashChainLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChainLog")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("last_hash", &self.last_hash)
            .finish_non_exhaustive()
    }
}

impl HashChainLog {
    /// Open a log over `store`, resuming the chain from its last entry.
    ///
    /// A damaged last entry does not prevent opening. The chain resumes
    /// without a parent and [`Self::verify_hash_chain`] reports the break.
    pub fn open(
        name: impl Into<String>,
        store: impl LogStore + 'static,
        clock: SharedClock,
    ) -> EngineResult<Self> {
        let name = name.into();
        let lines = store.read_lines()?;
        let last_hash = lines.last().and_then(|line| {
            let head = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|entry| entry.get(EVENT_HASH)?.as_str().map(str::to_owned));
            if head.is_none() {
                tracing::warn!(log = %name, entries = lines.len(), "last log entry unreadable, chain head lost");
            }
            head
        });
        Ok(Self {
            name,
            len: lines.len(),
            store: Box::new(store),
            last_hash,
            clock,
        })
    }

    /// In-memory log, mostly for tests and embedded use.
    pub fn in_memory(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            store: Box::new(MemoryLogStore::new()),
            last_hash: None,
            len: 0,
            clock,
        }
    }

    /// Log name, e.g. `scheduler`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries written.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash of the newest entry.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Append an entry and return its `eventHash`.
    ///
    /// `fields` should be a JSON object; any other value is stored under `data`.
    pub fn append(&mut self, event: &str, fields: Value) -> EngineResult<String> {
        let mut entry = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other);
                map
            }
        };
        entry.insert("event".into(), Value::String(event.to_owned()));
        entry.insert("timestamp_ms".into(), Value::from(self.clock.now_ms()));
        entry.insert(
            PARENT_HASH.into(),
            self.last_hash.clone().map_or(Value::Null, Value::String),
        );

        let event_hash = hash_entry(&entry);
        entry.insert(EVENT_HASH.into(), Value::String(event_hash.clone()));

        let line = serde_json::to_string(&Value::Object(entry))?;
        self.store.append(&line)?;
        self.last_hash = Some(event_hash.clone());
        self.len += 1;
        Ok(event_hash)
    }

    /// Append without propagating store failures; they are logged instead.
    pub fn record(&mut self, event: &str, fields: Value) {
        if let Err(e) = self.append(event, fields) {
            tracing::error!(log = %self.name, event, "failed to append log entry: {}", e);
        }
    }

    /// Parsed entries, oldest first.
    pub fn entries(&self) -> EngineResult<Vec<Value>> {
        self.store
            .read_lines()?
            .iter()
            .map(|line| serde_json::from_str(line).map_err(EngineError::from))
            .collect()
    }

    /// Recompute the chain from storage and report the first break.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        let lines = self.store.read_lines()?;
        let mut previous: Option<String> = None;

        for (index, line) in lines.iter().enumerate() {
            let broken = |reason: &str| ChainStatus::Broken {
                index,
                reason: reason.to_owned(),
            };
            let Ok(Value::Object(mut entry)) = serde_json::from_str::<Value>(line) else {
                return Ok(broken("entry is not a JSON object"));
            };
            let Some(Value::String(recorded)) = entry.remove(EVENT_HASH) else {
                return Ok(broken("missing eventHash"));
            };
            let parent = match entry.get(PARENT_HASH) {
                Some(Value::Null) => None,
                Some(Value::String(hash)) => Some(hash.clone()),
                _ => return Ok(broken("missing parentHash")),
            };
            if parent != previous {
                return Ok(broken("parentHash does not match previous eventHash"));
            }
            if hash_entry(&entry) != recorded {
                return Ok(broken("eventHash does not match entry contents"));
            }
            previous = Some(recorded);
        }

        if previous != self.last_hash {
            tracing::warn!(log = %self.name, "stored chain head differs from in-memory head");
            return Ok(ChainStatus::Broken {
                index: lines.len().saturating_sub(1),
                reason: "stored chain head differs from last written hash".into(),
            });
        }
        Ok(ChainStatus::Intact {
            entries: lines.len(),
        })
    }
}

/// SHA-256 hex digest of the canonical form of `entry`.
pub fn hash_entry(entry: &Map<String, Value>) -> String {
    let mut canonical = String::new();
    write_object(entry, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Canonical JSON text of `value`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => write_float(f, out),
            _ => {
                let _ = write!(out, "{n}");
            }
        },
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_string(key, out);
        out.push_str(": ");
        if let Some(value) = map.get(key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='\u{7f}' => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

/// Shortest round-trip float text, positional for decimal exponents in
/// `-4..16` and `d.ddde±XX` otherwise, with a `.0` on integral values.
fn write_float(f: f64, out: &mut String) {
    if f.classify() == std::num::FpCategory::Zero {
        out.push_str(if f.is_sign_negative() { "-0.0" } else { "0.0" });
        return;
    }
    let sci = format!("{:e}", f.abs());
    let Some((mantissa, exp)) = sci.split_once('e') else {
        let _ = write!(out, "{f}");
        return;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        let _ = write!(out, "{f}");
        return;
    };
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    if f.is_sign_negative() {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp < 0 {
            out.push_str("0.");
            for _ in 0..(-exp - 1) {
                out.push('0');
            }
            out.push_str(&digits);
        } else {
            let int_len = usize::try_from(exp).unwrap_or(0) + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                for _ in digits.len()..int_len {
                    out.push('0');
                }
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exp.unsigned_abs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys_and_spaces_separators() {
        let value = json!({"b": 1, "a": [true, null], "c": {"z": "x", "y": 2.5}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a": [true, null], "b": 1, "c": {"y": 2.5, "z": "x"}}"#
        );
    }

    #[test]
    fn test_canonical_json_escapes_non_ascii() {
        let value = json!({"name": "caf\u{e9} \u{1f600}\n"});
        assert_eq!(
            canonical_json(&value),
            r#"{"name": "caf\u00e9 \ud83d\ude00\n"}"#
        );
    }

    #[test]
    fn test_canonical_json_keeps_del_and_escapes_controls() {
        let value = json!({"s": "a\u{7f}b\u{1}"});
        assert_eq!(canonical_json(&value), "{\"s\": \"a\u{7f}b\\u0001\"}");
    }

    #[test]
    fn test_canonical_json_float_forms() {
        let cases = [
            (json!(1e-7), "1e-07"),
            (json!(1.5e-7), "1.5e-07"),
            (json!(0.0001), "0.0001"),
            (json!(0.00001), "1e-05"),
            (json!(5.0), "5.0"),
            (json!(-2.5), "-2.5"),
            (json!(123.45), "123.45"),
            (json!(1e15), "1000000000000000.0"),
            (json!(1e16), "1e+16"),
            (json!(1.2345e20), "1.2345e+20"),
            (json!(0.0), "0.0"),
            (json!(33.333_333_333_333_336), "33.333333333333336"),
            (json!(7), "7"),
            (json!(-3), "-3"),
        ];
        for (value, expected) in cases {
            assert_eq!(canonical_json(&value), expected, "{value}");
        }
    }

    #[test]
    fn test_open_tolerates_damaged_last_entry() {
        let clock = ManualClock::new(0);
        let store = MemoryLogStore::new();
        {
            let mut log = HashChainLog::open("test", store.clone(), clock.shared()).unwrap();
            log.append("a", json!({})).unwrap();
        }
        store.with_lines(|lines| lines.push("{\"event\": \"b\", \"trunc".to_owned()));

        let mut log = HashChainLog::open("test", store, clock.shared()).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.last_hash().is_none());
        log.append("c", json!({})).unwrap();
        assert_eq!(
            log.verify_hash_chain().unwrap(),
            ChainStatus::Broken {
                index: 1,
                reason: "entry is not a JSON object".to_owned(),
            }
        );
    }

    #[test]
    fn test_hash_is_computed_before_event_hash_is_attached() {
        let clock = ManualClock::new(5_000);
        let mut log = HashChainLog::in_memory("test", clock.shared());
        let hash = log.append("first", json!({"k": "v"})).unwrap();

        let entry = log.entries().unwrap().remove(0);
        let mut map = entry.as_object().unwrap().clone();
        assert_eq!(map.remove(EVENT_HASH), Some(Value::String(hash.clone())));
        assert_eq!(map.get(PARENT_HASH), Some(&Value::Null));
        assert_eq!(hash_entry(&map), hash);

        let expected = hex::encode(Sha256::digest(
            br#"{"event": "first", "k": "v", "parentHash": null, "timestamp_ms": 5000}"#,
        ));
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_entries_link_to_parent() {
        let mut log = HashChainLog::in_memory("test", ManualClock::new(0).shared());
        let first = log.append("a", json!({})).unwrap();
        log.append("b", json!({"n": 1})).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries[1][PARENT_HASH], Value::String(first));
        assert!(log.verify_hash_chain().unwrap().is_intact());
    }
}
