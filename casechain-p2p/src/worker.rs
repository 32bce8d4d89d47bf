use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::NetworkError;

/// Bounded pool for outbound calls: at most `max_concurrency` calls run at
/// once and each one is cut off after `call_timeout`.
///
/// A node keeps one pool per outbound concern and reuses it across sweeps.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize, call_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            call_timeout,
        }
    }

    /// Runs `fut` once a permit is free, bounded by the call timeout.
    pub async fn run<F, T>(&self, label: &str, fut: F) -> Result<T, NetworkError>
    where
        F: Future<Output = Result<T, NetworkError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NetworkError::Connection("worker pool closed".into()))?;

        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(label.to_string())),
        }
    }

    /// Runs every call through the pool and collects results in input order.
    pub async fn run_all<I, F, T>(&self, calls: I) -> Vec<Result<T, NetworkError>>
    where
        I: IntoIterator<Item = (String, F)>,
        F: Future<Output = Result<T, NetworkError>>,
    {
        let futs = calls
            .into_iter()
            .map(|(label, fut)| async move { self.run(&label, fut).await });
        futures::future::join_all(futs).await
    }
}
