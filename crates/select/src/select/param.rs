use crate::context::{CacheKey, PathParams, RequestContext};
use crate::error::Error;
use crate::selector::Selector;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Where the router stores the params of the matched route.
pub(crate) static ROUTE_PARAMS: Lazy<CacheKey<PathParams>> = Lazy::new(CacheKey::new);

/// All params captured by the matched route, empty outside of a router.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteParams;

pub fn route_params() -> RouteParams {
    RouteParams
}

#[async_trait]
impl Selector for RouteParams {
    type Output = Arc<PathParams>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        Ok(ctx.get(&*ROUTE_PARAMS)?.unwrap_or_default())
    }
}

/// One captured param, `None` when the matched route has no param of that name.
#[derive(Debug, Clone)]
pub struct RouteParam {
    name: String,
}

pub fn route_param(name: impl Into<String>) -> RouteParam {
    RouteParam { name: name.into() }
}

#[async_trait]
impl Selector for RouteParam {
    type Output = Option<String>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        let params = ctx.get(&*ROUTE_PARAMS)?;
        Ok(params.and_then(|params| params.get(&self.name).map(str::to_string)))
    }
}
