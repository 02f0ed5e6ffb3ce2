use crate::context::{CacheKey, RequestContext};
use crate::cookie::{self as codec, Cookies};
use crate::error::Error;
use crate::selector::Selector;
use async_trait::async_trait;
use http::header::COOKIE;
use once_cell::sync::Lazy;
use std::sync::Arc;

static COOKIES: Lazy<CacheKey<Cookies>> = Lazy::new(CacheKey::new);

/// Every cookie of the request; several `cookie` headers are read in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookiesSelector;

pub fn cookies() -> CookiesSelector {
    CookiesSelector
}

#[async_trait]
impl Selector for CookiesSelector {
    type Output = Arc<Cookies>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        ctx.get_or_compute(&*COOKIES, || async {
            let header = ctx
                .headers()
                .get_all(COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect::<Vec<_>>()
                .join("; ");
            Ok::<_, Error>(codec::parse(&header))
        })
        .await
    }
}

/// One cookie by name.
#[derive(Debug, Clone)]
pub struct CookieSelector {
    name: String,
}

pub fn cookie(name: impl Into<String>) -> CookieSelector {
    CookieSelector { name: name.into() }
}

#[async_trait]
impl Selector for CookieSelector {
    type Output = Option<String>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        let cookies = CookiesSelector.select(ctx).await?;
        Ok(cookies.get(&self.name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::{cookie, cookies};
    use crate::context::tests::context;
    use crate::selector::Selector;
    use http::Request;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cookies() {
        let ctx = context(
            Request::builder()
                .uri("/")
                .header("cookie", "session=abc; theme=dark")
                .header("cookie", "lang=en")
                .body("")
                .unwrap(),
        );

        let (all, session, missing, again) =
            (cookies(), cookie("session"), cookie("missing"), cookies()).select(&ctx).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["lang"], "en");
        assert_eq!(session.as_deref(), Some("abc"));
        assert_eq!(missing, None);
        assert!(Arc::ptr_eq(&all, &again));
    }
}
