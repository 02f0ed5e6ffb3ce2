use crate::context::{CacheKey, RequestContext};
use crate::error::Error;
use crate::selector::Selector;
use async_trait::async_trait;
use http::header::HOST;
use http::StatusCode;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use url::form_urlencoded;
use url::Url;

static URL: Lazy<CacheKey<Url>> = Lazy::new(CacheKey::new);
static QUERY: Lazy<CacheKey<QueryMap>> = Lazy::new(CacheKey::new);

/// Decoded query string pairs, in request order; a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    pub fn parse(query: &str) -> Self {
        Self { pairs: form_urlencoded::parse(query.as_bytes()).into_owned().collect() }
    }

    /// The first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Every value of `name`, in request order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs.iter().filter(|(key, _)| key == name).map(|(_, value)| value.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(key, _)| key == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// The absolute request url, host taken from the `host` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlSelector;

pub fn url() -> UrlSelector {
    UrlSelector
}

#[async_trait]
impl Selector for UrlSelector {
    type Output = Arc<Url>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        ctx.get_or_compute(&*URL, || async { parse_url(ctx) }).await
    }
}

fn parse_url(ctx: &RequestContext) -> Result<Url, Error> {
    let uri = ctx.uri();
    let invalid = |e: url::ParseError| Error::new(StatusCode::BAD_REQUEST, format!("invalid request url: {e}"));

    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).map_err(invalid);
    }

    let host = ctx
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map_or("/", |path_and_query| path_and_query.as_str());

    Url::parse(&format!("http://{host}{path}")).map_err(invalid)
}

/// The parsed query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuerySelector;

pub fn query() -> QuerySelector {
    QuerySelector
}

#[async_trait]
impl Selector for QuerySelector {
    type Output = Arc<QueryMap>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        ctx.get_or_compute(&*QUERY, || async { Ok::<_, Error>(QueryMap::parse(ctx.uri().query().unwrap_or_default())) }).await
    }
}

/// The query string deserialized into `T`, nested keys like `a[b]=c` supported.
pub struct QueryAs<T> {
    _phantom: PhantomData<fn() -> T>,
}

pub fn query_as<T>() -> QueryAs<T> {
    QueryAs { _phantom: PhantomData }
}

impl<T> Clone for QueryAs<T> {
    fn clone(&self) -> Self {
        query_as()
    }
}

#[async_trait]
impl<T> Selector for QueryAs<T>
where
    T: DeserializeOwned + Send,
{
    type Output = T;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        let query = ctx.uri().query().unwrap_or_default();
        serde_qs::from_str(query).map_err(Error::invalid_query)
    }
}
