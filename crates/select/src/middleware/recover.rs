use crate::app::ErrorConfig;
use crate::context::RequestContext;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::reply::Reply;
use async_trait::async_trait;

/// Answers every error raised downstream with an error reply.
///
/// Placed first in a list it behaves like the boundary of [`crate::App`]; placed deeper
/// it only covers what comes after it, outer middleware still see their own errors.
#[derive(Debug, Clone, Default)]
pub struct Recover {
    config: ErrorConfig,
}

pub fn recover(config: ErrorConfig) -> Recover {
    Recover { config }
}

#[async_trait]
impl Middleware for Recover {
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        match next.run().await {
            Ok(reply) => Ok(reply),
            Err(e) => Ok(self.config.error_reply(ctx, &e)),
        }
    }
}
