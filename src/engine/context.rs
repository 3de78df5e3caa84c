use crate::engine::loopback::{LoopbackBehavior, LoopbackEngine};
use crate::engine::webrtc::WebRtcEngine;
use crate::engine::{Engine, EngineError};
use crate::error::NegotiationError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// A named runtime that engine work or engine callbacks run on.
pub struct ExecutionContext {
    name: String,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl ExecutionContext {
    pub fn new(name: &str, threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(name)
            .enable_all()
            .build()?;
        debug!(context = name, threads, "execution context started");
        Ok(Self {
            name: name.to_string(),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            name: Arc::from(self.name.as_str()),
            handle: self.handle.clone(),
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            // Blocking shutdown is not allowed from inside a runtime.
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
        debug!(context = %self.name, "execution context stopped");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable entry point into an [`ExecutionContext`].
#[derive(Clone)]
pub struct ContextHandle {
    name: Arc<str>,
    handle: Handle,
}

impl ContextHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { f() });
    }

    pub fn post_delayed<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            f()
        });
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Runs `fut` on this context and blocks the calling thread until it
    /// finishes. Must be called from outside any runtime.
    pub fn invoke<F>(&self, fut: F) -> Result<F::Output, EngineError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            warn!(context = %self.name, "invoke from inside a runtime refused");
            return Err(EngineError::Failed(format!(
                "cannot block on {} from inside a runtime",
                self.name
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.handle.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv().map_err(|_| EngineError::ContextClosed)
    }

    /// Invokes when the caller may block, otherwise spawns and returns.
    pub fn drive<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if Handle::try_current().is_ok() {
            self.handle.spawn(fut);
        } else if let Err(e) = self.invoke(fut) {
            debug!(context = %self.name, error = %e, "drive skipped");
        }
    }
}

/// Which engine an [`EngineContext`] builds.
#[derive(Debug, Clone)]
pub enum EngineKind {
    WebRtc,
    Loopback(LoopbackBehavior),
}

/// Process-wide engine resources: worker context, signaling context and the
/// session factory. Built once, passed to every session, torn down last.
pub struct EngineContext {
    // Field order is teardown order: engine, then signaling, then worker.
    engine: Arc<dyn Engine>,
    signaling: ExecutionContext,
    worker: ExecutionContext,
}

impl EngineContext {
    pub fn new(kind: EngineKind) -> Result<Self, NegotiationError> {
        match kind {
            EngineKind::WebRtc => Self::with_factory(|worker, signaling| {
                let engine: Arc<dyn Engine> =
                    Arc::new(WebRtcEngine::new(worker.clone(), signaling.clone()));
                Ok(engine)
            }),
            EngineKind::Loopback(behavior) => Self::with_factory(move |_, signaling| {
                let engine: Arc<dyn Engine> =
                    Arc::new(LoopbackEngine::new(signaling.clone(), behavior));
                Ok(engine)
            }),
        }
    }

    pub fn with_factory<F>(factory: F) -> Result<Self, NegotiationError>
    where
        F: FnOnce(&ContextHandle, &ContextHandle) -> Result<Arc<dyn Engine>, EngineError>,
    {
        let worker = ExecutionContext::new("rtc-worker", 2)
            .map_err(|e| NegotiationError::Initialization(format!("worker context: {e}")))?;
        let signaling = ExecutionContext::new("rtc-signaling", 1)
            .map_err(|e| NegotiationError::Initialization(format!("signaling context: {e}")))?;
        let engine = factory(&worker.handle(), &signaling.handle())
            .map_err(|e| NegotiationError::Initialization(e.to_string()))?;
        Ok(Self {
            engine,
            signaling,
            worker,
        })
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub fn worker(&self) -> ContextHandle {
        self.worker.handle()
    }

    pub fn signaling(&self) -> ContextHandle {
        self.signaling.handle()
    }

    pub fn shutdown(self) {
        let Self {
            engine,
            signaling,
            worker,
        } = self;
        drop(engine);
        signaling.shutdown();
        worker.shutdown();
    }
}
