//! Actor wrapper giving many async tasks serialized access to one [`Engine`].
//!
//! The engine lives inside a single tokio task. Callers send closures over an
//! `mpsc` channel and receive results over a `oneshot`, so no component ever
//! sees concurrent calls.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::cache::SyncBackend;
use crate::core::executor::TaskExecutor;
use crate::core::{EngineError, EngineResult};
use crate::runtime::api::Engine;

/// Pending requests buffered before `call` starts waiting.
pub const DEFAULT_MAILBOX: usize = 256;

type Job<E, B> = Box<dyn FnOnce(&mut Engine<E, B>) + Send>;

/// Owner task of an [`Engine`].
#[derive(Debug)]
pub struct EngineActor;

impl EngineActor {
    /// Move `engine` into a task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like [`tokio::spawn`].
    pub fn spawn<E, B>(engine: Engine<E, B>) -> EngineHandle<E, B>
    where
        E: TaskExecutor + 'static,
        B: SyncBackend + 'static,
    {
        Self::spawn_on(engine, &Handle::current())
    }

    /// Move `engine` into a task on `handle`'s runtime.
    pub fn spawn_on<E, B>(engine: Engine<E, B>, handle: &Handle) -> EngineHandle<E, B>
    where
        E: TaskExecutor + 'static,
        B: SyncBackend + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Job<E, B>>(DEFAULT_MAILBOX);
        handle.spawn(async move {
            let mut engine = engine;
            while let Some(job) = rx.recv().await {
                job(&mut engine);
            }
            tracing::debug!("engine actor stopped");
        });
        EngineHandle { tx }
    }
}

/// Cloneable handle to an engine actor. The actor stops once every handle is dropped.
pub struct EngineHandle<E, B> {
    tx: mpsc::Sender<Job<E, B>>,
}

impl<E, B> Clone for EngineHandle<E, B> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E, B> std::fmt::Debug for EngineHandle<E, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<E, B> EngineHandle<E, B>
where
    E: TaskExecutor + 'static,
    B: SyncBackend + 'static,
{
    /// Run `f` against the engine and return its result.
    pub async fn call<R, F>(&self, f: F) -> EngineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine<E, B>) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<E, B> = Box::new(move |engine| {
            let _ = reply_tx.send(f(engine));
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| EngineError::ActorClosed)?;
        reply_rx.await.map_err(|_| EngineError::ActorClosed)
    }

    /// True once the actor task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
