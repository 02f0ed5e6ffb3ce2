//! Request scoped state shared by selectors, middleware and handlers.
//!
//! A [`RequestContext`] is created once per inbound request by the entry point. It owns
//! the request head, the not yet consumed request body and a cache of derived values
//! (parsed url, parsed body, cookies, route params...) keyed by [`CacheKey`]s.
//!
//! The context is a cheap handle: clones share the same request and the same cache. Once
//! the response is produced the entry point unloads the context, after which every access
//! through a retained clone fails with [`Error::ContextNotLoaded`].

use crate::body::{OptionReqBody, ReqBody};
use crate::error::Error;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Request, Uri, Version};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type CachedValue = Arc<dyn Any + Send + Sync>;
type Slot = Arc<OnceCell<CachedValue>>;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// An opaque token identifying one slot of the per-request cache.
///
/// Every call to [`CacheKey::new`] yields a distinct slot; clones address the same slot.
pub struct CacheKey<T> {
    id: u64,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> CacheKey<T> {
    pub fn new() -> Self {
        Self { id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed), _phantom: PhantomData }
    }
}

impl<T> Default for CacheKey<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CacheKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CacheKey<T> {}

impl<T> fmt::Debug for CacheKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.id).finish()
    }
}

#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

struct Inner {
    head: Parts,
    body: OptionReqBody,
    cache: Mutex<HashMap<u64, Slot>>,
    loaded: AtomicBool,
}

impl RequestContext {
    /// Creates the context of one inbound request, with an empty cache.
    pub fn new(request: Request<ReqBody>) -> Self {
        let (head, body) = request.into_parts();
        Self::from_parts(head, body)
    }

    pub fn from_parts(head: Parts, body: ReqBody) -> Self {
        let inner = Inner {
            head,
            body: OptionReqBody::from(body),
            cache: Mutex::new(HashMap::new()),
            loaded: AtomicBool::new(true),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.inner.head.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.inner.head.uri
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.inner.head.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.head.headers
    }

    /// Returns the extensions the transport attached to the request
    pub fn extensions(&self) -> &Extensions {
        &self.inner.head.extensions
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    /// Ends the request scope: drops every cached value and rejects later accesses.
    pub fn unload(&self) {
        self.inner.loaded.store(false, Ordering::Release);
        if let Ok(mut cache) = self.inner.cache.lock() {
            cache.clear();
        }
    }

    fn ensure_loaded(&self) -> Result<(), Error> {
        if self.is_loaded() { Ok(()) } else { Err(Error::ContextNotLoaded) }
    }

    /// Takes the raw request body; only the first caller gets it.
    pub async fn take_body(&self) -> Result<Option<ReqBody>, Error> {
        self.ensure_loaded()?;
        Ok(self.inner.body.take().await)
    }

    /// Hands a taken body back, for instance after reading only its first frames.
    pub async fn restore_body(&self, body: ReqBody) -> Result<(), Error> {
        self.ensure_loaded()?;
        self.inner.body.restore(body).await;
        Ok(())
    }

    /// Returns the value cached under `key`, computing it with `compute` on a miss.
    ///
    /// Concurrent callers for the same key wait for a single computation. A failed
    /// computation is not cached, the next caller runs `compute` again.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey<T>, compute: F) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let slot = self.slot(key.id)?;
        let value = slot
            .get_or_try_init(|| async { compute().await.map(|value| Arc::new(value) as CachedValue) })
            .await?;
        downcast(Arc::clone(value))
    }

    /// Returns the cached value of `key` without computing anything.
    pub fn get<T>(&self, key: &CacheKey<T>) -> Result<Option<Arc<T>>, Error>
    where
        T: Send + Sync + 'static,
    {
        let slot = self.slot(key.id)?;
        slot.get().map(|value| downcast(Arc::clone(value))).transpose()
    }

    /// Stores `value` under `key`, replacing whatever was cached before.
    pub fn insert<T>(&self, key: &CacheKey<T>, value: T) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        self.ensure_loaded()?;
        let value = Arc::new(value);
        let slot = Arc::new(OnceCell::new_with(Some(Arc::clone(&value) as CachedValue)));
        self.lock_cache()?.insert(key.id, slot);
        Ok(value)
    }

    fn slot(&self, id: u64) -> Result<Slot, Error> {
        self.ensure_loaded()?;
        let mut cache = self.lock_cache()?;
        Ok(Arc::clone(cache.entry(id).or_default()))
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, Slot>>, Error> {
        self.inner.cache.lock().map_err(|_| Error::internal("request context cache is poisoned"))
    }
}

fn downcast<T: Send + Sync + 'static>(value: CachedValue) -> Result<Arc<T>, Error> {
    value.downcast::<T>().map_err(|_| Error::internal("cached value has an unexpected type"))
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

/// Represents path parameters extracted from the URL path of an HTTP request.
///
/// Path parameters are named segments in the URL path that can be extracted and accessed
/// by name. For example, in the path "/users/:id", "id" is a path parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if there are no path parameters
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the number of path parameters
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Gets the value of a path parameter by its name
    /// Returns None if the parameter doesn't exist
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<'k, 'v> From<matchit::Params<'k, 'v>> for PathParams {
    fn from(params: matchit::Params<'k, 'v>) -> Self {
        let params = params.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
        Self { params }
    }
}

impl FromIterator<(String, String)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { params: iter.into_iter().collect() }
    }
}
