//! Built-in selectors.
//!
//! Selectors doing idempotent parsing (url, query, cookies, bodies) cache their result
//! under a process wide key, so every instance of them shares one identity and a
//! request parses each of these at most once.

mod body;
mod cookie;
mod multipart;
mod param;
mod query;

pub use self::body::{body_bytes, body_text, form_body, json_body, BodyBytes, BodyOptions, BodyText, FormBody, JsonBody};
pub use self::cookie::{cookie, cookies, CookieSelector, CookiesSelector};
pub use self::multipart::{multipart_body, remove_uploads, MultipartBody, MultipartOptions, MultipartSelector, UploadedFile};
pub use self::param::{route_param, route_params, RouteParam, RouteParams};
pub use self::query::{query, query_as, url, QueryAs, QueryMap, QuerySelector, UrlSelector};

pub(crate) use self::param::ROUTE_PARAMS;

use crate::context::RequestContext;
use crate::error::Error;
use crate::selector::Selector;
use async_trait::async_trait;
use http::{HeaderMap, Method};

/// Selects the context itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextSelector;

pub fn context() -> ContextSelector {
    ContextSelector
}

#[async_trait]
impl Selector for ContextSelector {
    type Output = RequestContext;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        Ok(ctx.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MethodSelector;

pub fn method() -> MethodSelector {
    MethodSelector
}

#[async_trait]
impl Selector for MethodSelector {
    type Output = Method;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        Ok(ctx.method().clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadersSelector;

pub fn headers() -> HeadersSelector {
    HeadersSelector
}

#[async_trait]
impl Selector for HeadersSelector {
    type Output = HeaderMap;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        Ok(ctx.headers().clone())
    }
}

/// Selects the first value of one header, `None` when it is absent or not visible ascii.
#[derive(Debug, Clone)]
pub struct HeaderSelector {
    name: String,
}

pub fn header(name: impl Into<String>) -> HeaderSelector {
    HeaderSelector { name: name.into() }
}

#[async_trait]
impl Selector for HeaderSelector {
    type Output = Option<String>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        let value = ctx.headers().get(self.name.as_str()).and_then(|value| value.to_str().ok());
        Ok(value.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::{context, header, headers, method};
    use crate::context::tests::context as request_context;
    use crate::selector::Selector;
    use http::{Method, Request};

    #[tokio::test]
    async fn test_request_head_selectors() {
        let ctx = request_context(
            Request::builder().method(Method::PUT).uri("/").header("X-Token", "abc").body("").unwrap(),
        );

        let (m, all, token, missing, same) =
            (method(), headers(), header("x-token"), header("x-missing"), context()).select(&ctx).await.unwrap();

        assert_eq!(m, Method::PUT);
        assert_eq!(all.len(), 1);
        assert_eq!(token.as_deref(), Some("abc"));
        assert_eq!(missing, None);
        assert_eq!(same.uri(), ctx.uri());
    }
}
