use std::future::Future;
use std::time::Duration;

use tracing::warn;

use concierge_core::errors::ResponseError;

/// Bounds a pipeline run by wall-clock time.
///
/// When the budget elapses the inner future is dropped, so nothing it would have done
/// afterwards happens. There is no retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutGuard {
    budget: Duration,
}

impl TimeoutGuard {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn from_millis(budget_ms: u64) -> Self {
        Self::new(Duration::from_millis(budget_ms))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub async fn run<F, T>(&self, work: F) -> Result<T, ResponseError>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.budget, work).await {
            Ok(output) => Ok(output),
            Err(_) => {
                let budget_ms = self.budget.as_millis() as u64;
                warn!(event_name = "timeout.elapsed", budget_ms, "response budget exceeded");
                Err(ResponseError::Timeout { budget_ms })
            }
        }
    }
}
