//! Selectors extract typed values from the request context.
//!
//! A [`Selector`] is a long lived, stateless description of how to compute one value
//! for a request. Handlers and middleware list the selectors they need as a tuple;
//! the tuple itself is a selector whose elements resolve strictly left to right, each
//! one settling before the next starts. The first failure aborts the resolution.
//!
//! Selectors doing idempotent work cache their result in the [`RequestContext`], see
//! [`memo`]. The built-in selectors live in [`crate::select`].

use crate::context::{CacheKey, RequestContext};
use crate::error::Error;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait Selector: Send + Sync {
    type Output: Send;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error>;
}

#[async_trait]
impl<S> Selector for Arc<S>
where
    S: Selector + ?Sized,
{
    type Output = S::Output;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        (**self).select(ctx).await
    }
}

#[async_trait]
impl<S> Selector for Box<S>
where
    S: Selector + ?Sized,
{
    type Output = S::Output;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        (**self).select(ctx).await
    }
}

/// impl `Selector` for tuples, From 0 elements to 12 elements
macro_rules! impl_selector_for_tuple ({ $($param:ident)* } => {
    #[async_trait]
    impl<$($param,)*> Selector for ($($param,)*)
    where
        $($param: Selector,)*
    {
        type Output = ($(<$param as Selector>::Output,)*);

        #[allow(non_snake_case, unused_variables)]
        async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
            let ($($param,)*) = self;
            Ok(($($param.select(ctx).await?,)*))
        }
    }
});

impl_selector_for_tuple! {}
impl_selector_for_tuple! { A }
impl_selector_for_tuple! { A B }
impl_selector_for_tuple! { A B C }
impl_selector_for_tuple! { A B C D }
impl_selector_for_tuple! { A B C D E }
impl_selector_for_tuple! { A B C D E F }
impl_selector_for_tuple! { A B C D E F G }
impl_selector_for_tuple! { A B C D E F G H }
impl_selector_for_tuple! { A B C D E F G H I }
impl_selector_for_tuple! { A B C D E F G H I J }
impl_selector_for_tuple! { A B C D E F G H I J K }
impl_selector_for_tuple! { A B C D E F G H I J K L }

/// A selector whose result is computed at most once per request.
///
/// The identity of a `Memo` is its cache key: clones share the key, so listing the
/// same memoized selector twice computes once. Two separate `memo(..)` calls are two
/// identities even when they wrap equal selectors.
pub struct Memo<S: Selector> {
    inner: Arc<S>,
    key: CacheKey<S::Output>,
}

/// Caches the output of `selector` in the request context.
pub fn memo<S: Selector>(selector: S) -> Memo<S> {
    Memo { inner: Arc::new(selector), key: CacheKey::new() }
}

impl<S: Selector> Clone for Memo<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), key: self.key }
    }
}

impl<S: Selector> fmt::Debug for Memo<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo").field("key", &self.key).finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> Selector for Memo<S>
where
    S: Selector,
    S::Output: Sync + 'static,
{
    type Output = Arc<S::Output>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        ctx.get_or_compute(&self.key, || self.inner.select(ctx)).await
    }
}

/// A selector backed by an async function of the context.
#[derive(Clone)]
pub struct SelectorFn<F> {
    f: F,
}

/// Builds a selector from `f`; combine with [`memo`] to cache its result.
pub fn selector_fn<F, Fut, T>(f: F) -> SelectorFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send,
    T: Send,
{
    SelectorFn { f }
}

#[async_trait]
impl<F, Fut, T> Selector for SelectorFn<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send,
    T: Send,
{
    type Output = T;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        (self.f)(ctx.clone()).await
    }
}

/// A selector turning the failure of the wrapped selector into `None`.
#[derive(Clone, Debug)]
pub struct Optional<S> {
    inner: S,
}

pub fn optional<S: Selector>(selector: S) -> Optional<S> {
    Optional { inner: selector }
}

#[async_trait]
impl<S: Selector> Selector for Optional<S> {
    type Output = Option<S::Output>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        match self.inner.select(ctx).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::ContextNotLoaded) => Err(Error::ContextNotLoaded),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{memo, optional, selector_fn, Selector};
    use crate::context::tests::get;
    use crate::context::RequestContext;
    use crate::error::Error;
    use crate::select::url;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_same_static_selector_twice() {
        let ctx = get("/a/b?c=d");

        let (first, second) = (url(), url()).select(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.path(), "/a/b");
    }

    #[tokio::test]
    async fn test_memo_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let counter = memo(selector_fn(move |_ctx: RequestContext| {
            let calls = Arc::clone(&counted);
            async move { Ok::<_, Error>(calls.fetch_add(1, Ordering::SeqCst)) }
        }));

        let ctx = get("/");
        let (a, b, c) = (counter.clone(), counter.clone(), counter.clone()).select(&ctx).await.unwrap();
        assert_eq!((*a, *b, *c), (0, 0, 0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a new request computes again
        let other = get("/");
        assert_eq!(*counter.select(&other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sequential_resolution() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let step = |n: u8| {
            let order = Arc::clone(&order);
            selector_fn(move |_ctx: RequestContext| {
                let order = Arc::clone(&order);
                async move {
                    tokio::task::yield_now().await;
                    order.lock().unwrap().push(n);
                    Ok::<_, Error>(n)
                }
            })
        };

        let ctx = get("/");
        let values = (step(1), step(2), step(3)).select(&ctx).await.unwrap();
        assert_eq!(values, (1, 2, 3));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let reached = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&reached);

        let failing = selector_fn(|_ctx: RequestContext| async {
            Err::<u8, _>(Error::new(StatusCode::UNAUTHORIZED, "who are you"))
        });
        let after = selector_fn(move |_ctx: RequestContext| {
            let reached = Arc::clone(&counted);
            async move { Ok::<_, Error>(reached.fetch_add(1, Ordering::SeqCst)) }
        });

        let ctx = get("/");
        let err = (failing, after).select(&ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optional() {
        let failing = selector_fn(|_ctx: RequestContext| async { Err::<u8, _>(Error::invalid_body("no")) });
        let ctx = get("/");

        assert_eq!(optional(failing).select(&ctx).await.unwrap(), None);
        let present = selector_fn(|_ctx: RequestContext| async { Ok::<_, Error>(3u8) });
        assert_eq!(optional(present).select(&ctx).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_empty_tuple() {
        let ctx = get("/");
        ().select(&ctx).await.unwrap();
    }
}
