use crate::context::RequestContext;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::reply::Reply;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Fails with [`Error::Timeout`] when the rest of the chain does not finish in time.
///
/// The unfinished chain is dropped, nothing downstream is polled after the deadline.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

pub fn timeout(duration: Duration) -> Timeout {
    Timeout { duration }
}

#[async_trait]
impl Middleware for Timeout {
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        if let Ok(result) = tokio::time::timeout(self.duration, next.run()).await {
            result
        } else {
            warn!(method = %ctx.method(), uri = %ctx.uri(), timeout = ?self.duration, "request timed out");
            Err(Error::Timeout { millis: self.duration.as_millis() })
        }
    }
}
