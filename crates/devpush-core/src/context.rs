//! Deadline and cancellation carried into every remote call

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Per-call deadline plus the stop signal of the cycle that issued it.
///
/// Implementations of the remote traits receive the context so they can
/// honor it natively; the pipeline additionally wraps every call in
/// [`CallContext::guard`], so an implementation that ignores it still cannot
/// outlive the deadline or a stop request.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    timeout: Duration,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// A context that is never cancelled.
    pub fn detached(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast when the stop signal has already fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `call`, bounded by the deadline and the stop signal.
    ///
    /// Timeout maps to [`Error::TransientTransport`]; cancellation maps to
    /// [`Error::Cancelled`]. The in-flight future is dropped in both cases.
    pub async fn guard<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::transport(
                    operation,
                    format!("deadline of {:?} exceeded", self.timeout),
                )),
            },
        }
    }
}
