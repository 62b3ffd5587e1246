//! Bounded retry with exponential backoff and jitter
//!
//! Every call against the remote target or the cluster API goes through
//! [`RetryScheduler`]. It is the only place in the pipeline that decides
//! between retrying and surfacing an error.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::context::CallContext;
use crate::error::{Error, ErrorClass, Result};

/// One unit of retryable work.
///
/// The action receives the zero-based attempt number so it can re-read
/// remote state before re-applying on later attempts. Built per call and
/// consumed by [`RetryScheduler::execute`].
pub struct RetryableOperation<'a, F> {
    name: &'a str,
    action: F,
    classify: fn(&Error) -> ErrorClass,
}

impl<'a, F> RetryableOperation<'a, F> {
    pub fn new(name: &'a str, action: F) -> Self {
        Self {
            name,
            action,
            classify: Error::class,
        }
    }

    /// Replace the default [`Error::class`] classification.
    pub fn with_classifier(mut self, classify: fn(&Error) -> ErrorClass) -> Self {
        self.classify = classify;
        self
    }
}

/// Runs [`RetryableOperation`]s under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.jitter)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Shorthand for executing an operation with the default classifier.
    pub async fn run<T, F, Fut>(&self, name: &str, ctx: &CallContext, action: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(RetryableOperation::new(name, action), ctx).await
    }

    /// Run the operation until it succeeds, fails fatally, or uses up
    /// `max_attempts`.
    ///
    /// # Errors
    ///
    /// - fatal errors are returned unchanged after the attempt that raised them
    /// - [`Error::RetryExhausted`] wraps the last transient error
    /// - [`Error::Cancelled`] if the stop signal fires, including mid-backoff
    pub async fn execute<T, F, Fut>(
        &self,
        mut op: RetryableOperation<'_, F>,
        ctx: &CallContext,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.backoff();
        let mut attempt = 0;

        loop {
            ctx.check()?;
            let outcome = ctx.guard(op.name, (op.action)(attempt)).await;
            attempt += 1;

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = op.name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if matches!(err, Error::Cancelled) || (op.classify)(&err) == ErrorClass::Fatal {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(operation = op.name, attempts = attempt, error = %err, "retries exhausted");
                return Err(Error::RetryExhausted {
                    operation: op.name.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff());
            warn!(
                operation = op.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            sleep_or_cancel(delay, ctx).await?;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, ctx: &CallContext) -> Result<()> {
    tokio::select! {
        _ = ctx.cancel_token().cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
