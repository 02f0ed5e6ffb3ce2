//! Turning a selector tuple and a business function into a request handler.
//!
//! [`handler`] pairs the selectors with an async function taking their outputs as
//! positional arguments. Nothing is resolved when the handler is built; on every
//! request the selectors run left to right, then the function, and its return value is
//! converted into a [`Reply`] with [`IntoReply`].

use crate::context::RequestContext;
use crate::error::Error;
use crate::fn_trait::FnTrait;
use crate::reply::Reply;
use crate::responder::IntoReply;
use crate::selector::Selector;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error>;
}

#[async_trait]
impl<H> RequestHandler for Box<H>
where
    H: RequestHandler + ?Sized,
{
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        (**self).invoke(ctx).await
    }
}

#[async_trait]
impl<H> RequestHandler for Arc<H>
where
    H: RequestHandler + ?Sized,
{
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        (**self).invoke(ctx).await
    }
}

/// a `FnTrait` holder which represents any async Fn, together with the selectors feeding it
pub struct FnHandler<S, F> {
    selectors: S,
    f: F,
}

/// Compiles `selectors` and `f` into a handler.
///
/// A single selector is written as a one element tuple: `handler((url(),), f)`.
pub fn handler<S, F>(selectors: S, f: F) -> FnHandler<S, F>
where
    S: Selector,
    F: FnTrait<S::Output>,
{
    FnHandler { selectors, f }
}

#[async_trait]
impl<S, F> RequestHandler for FnHandler<S, F>
where
    S: Selector,
    F: FnTrait<S::Output>,
    F::Output: IntoReply,
{
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        let args = self.selectors.select(ctx).await?;
        self.f.call(args).await.into_reply()
    }
}
