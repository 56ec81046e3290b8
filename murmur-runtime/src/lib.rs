//! Tokio runtime owned by the `murmur` binary, plus the root cancellation
//! token that every invocation derives its own token from.
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct MurmurHandle {
    inner: Handle,
    root: CancellationToken,
}

pub struct MurmurRuntime {
    runtime: Runtime,
    root: CancellationToken,
}

impl MurmurRuntime {
    /// Multi-thread runtime with IO and timers enabled.
    ///
    /// ```
    /// use murmur_runtime::MurmurRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = MurmurRuntime::build("murmur-doc", Some(1)).expect("runtime builds");
    /// assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);
        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }

        Ok(Self {
            runtime: builder.build()?,
            root: CancellationToken::new(),
        })
    }

    pub fn handle(&self) -> MurmurHandle {
        MurmurHandle {
            inner: self.runtime.handle().clone(),
            root: self.root.clone(),
        }
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel the root token, then give tasks `graceful` to finish.
    ///
    /// ```
    /// use murmur_runtime::MurmurRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = MurmurRuntime::build("murmur-shutdown", Some(1)).unwrap();
    /// let root = runtime.handle().cancellation();
    /// runtime.shutdown(Duration::from_millis(5));
    /// assert!(root.is_cancelled());
    /// ```
    pub fn shutdown(self, graceful: Duration) {
        self.root.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl MurmurHandle {
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// The root token; cancelling it stops every derived token.
    pub fn cancellation(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Child of the root token that also fires once `limit` has elapsed.
    ///
    /// ```
    /// use murmur_runtime::MurmurRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = MurmurRuntime::build("murmur-deadline", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// let token = handle.deadline(Duration::from_millis(20));
    /// runtime.block_on(token.cancelled());
    /// assert!(token.is_cancelled());
    /// assert!(!handle.cancellation().is_cancelled());
    /// runtime.shutdown(Duration::from_millis(5));
    /// ```
    pub fn deadline(&self, limit: Duration) -> CancellationToken {
        let token = self.root.child_token();
        let timer = token.clone();
        self.inner.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(limit_ms = limit.as_millis() as u64, "runtime.deadline_elapsed");
                    timer.cancel();
                }
            }
        });
        token
    }

    /// Cancel the root token on the first Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let root = self.root.clone();
        self.inner.spawn(async move {
            tokio::select! {
                _ = root.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => tracing::info!("runtime.interrupted"),
                        Err(e) => tracing::error!(error = %e, "runtime.signal_unavailable"),
                    }
                    root.cancel();
                }
            }
        });
    }
}
