//! Middleware wraps the rest of the handler chain.
//!
//! [`compose`] turns an ordered list of middleware and a terminal handler into one
//! [`Pipeline`]. The first middleware of the list is the outermost: it runs first and
//! sees the reply (or the error) last. Each middleware receives a [`Next`]; running it
//! invokes the remaining chain, not running it short-circuits everything downstream.
//! `Next::run` consumes the continuation, so it can be run at most once.

mod compress;
mod recover;
mod timeout;

pub use compress::{compress, Compress};
pub use recover::{recover, Recover};
pub use timeout::{timeout, Timeout};

use crate::context::RequestContext;
use crate::error::Error;
use crate::fn_trait::MiddlewareFnTrait;
use crate::handler::RequestHandler;
use crate::reply::Reply;
use crate::responder::IntoReply;
use crate::selector::Selector;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error>;
}

#[async_trait]
impl<M> Middleware for Arc<M>
where
    M: Middleware + ?Sized,
{
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        (**self).call(ctx, next).await
    }
}

#[async_trait]
impl<M> Middleware for Box<M>
where
    M: Middleware + ?Sized,
{
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        (**self).call(ctx, next).await
    }
}

type Chain = Arc<[Arc<dyn Middleware>]>;

/// The remaining middleware chain and its terminal handler.
pub struct Next {
    ctx: RequestContext,
    chain: Chain,
    index: usize,
    terminal: Arc<dyn RequestHandler>,
}

impl Next {
    /// Runs everything below the current middleware.
    pub async fn run(self) -> Result<Reply, Error> {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let middleware = Arc::clone(middleware);
                let ctx = self.ctx.clone();
                let next = Next { index: self.index + 1, ..self };
                middleware.call(&ctx, next).await
            }
            None => self.terminal.invoke(&self.ctx).await,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &(self.chain.len() - self.index)).finish_non_exhaustive()
    }
}

/// A terminal handler wrapped by an ordered middleware chain.
#[derive(Clone)]
pub struct Pipeline {
    chain: Chain,
    terminal: Arc<dyn RequestHandler>,
}

/// Builds the pipeline without invoking anything; the first middleware is the outermost.
pub fn compose<I, H>(middleware: I, terminal: H) -> Pipeline
where
    I: IntoIterator<Item = Arc<dyn Middleware>>,
    H: RequestHandler + 'static,
{
    Pipeline { chain: middleware.into_iter().collect(), terminal: Arc::new(terminal) }
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl RequestHandler for Pipeline {
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        let next = Next { ctx: ctx.clone(), chain: Arc::clone(&self.chain), index: 0, terminal: Arc::clone(&self.terminal) };
        next.run().await
    }
}

/// A middleware built from selectors and an async function `f(next, a, b, ..)`.
pub struct FnMiddleware<S, F> {
    selectors: S,
    f: F,
}

/// The selectors are resolved only when the middleware is reached.
pub fn middleware_fn<S, F>(selectors: S, f: F) -> FnMiddleware<S, F>
where
    S: Selector,
    F: MiddlewareFnTrait<S::Output>,
{
    FnMiddleware { selectors, f }
}

#[async_trait]
impl<S, F> Middleware for FnMiddleware<S, F>
where
    S: Selector,
    F: MiddlewareFnTrait<S::Output>,
    F::Output: IntoReply,
{
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        let args = self.selectors.select(ctx).await?;
        self.f.call(next, args).await.into_reply()
    }
}
