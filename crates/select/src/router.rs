//! Ordered method and path dispatch.
//!
//! A [`Router`] is itself a [`RequestHandler`]. Routes are tried in registration order
//! and the first route whose method filter and path pattern both match wins; its
//! params are stored in the request context (see [`crate::select::route_param`])
//! before its handler runs. When nothing matches the router answers with
//! [`Error::NotFound`] unless a not-found handler was given.
//!
//! Patterns use `:name` for a named segment and `*name` for a catch-all tail. Trailing
//! slashes are ignored on both patterns and request paths, except for the root `/`.

use crate::context::{PathParams, RequestContext};
use crate::error::Error;
use crate::filter::{Filter, MethodFilter};
use crate::handler::RequestHandler;
use crate::middleware::{compose, Middleware, Pipeline};
use crate::reply::Reply;
use crate::select::ROUTE_PARAMS;
use async_trait::async_trait;
use http::Method;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tracing::{debug, trace};

/// What a route answers: a method filter and a path pattern.
///
/// A bare pattern answers `GET`.
pub trait IntoRouteSpec {
    fn into_route_spec(self) -> (MethodFilter, String);
}

impl IntoRouteSpec for &str {
    fn into_route_spec(self) -> (MethodFilter, String) {
        (MethodFilter::Only(Method::GET), self.to_string())
    }
}

impl IntoRouteSpec for String {
    fn into_route_spec(self) -> (MethodFilter, String) {
        (MethodFilter::Only(Method::GET), self)
    }
}

impl<P: Into<String>> IntoRouteSpec for (P, Method) {
    fn into_route_spec(self) -> (MethodFilter, String) {
        (MethodFilter::Only(self.1), self.0.into())
    }
}

impl<P: Into<String>> IntoRouteSpec for (P, MethodFilter) {
    fn into_route_spec(self) -> (MethodFilter, String) {
        (self.1, self.0.into())
    }
}

struct Route {
    method: MethodFilter,
    pattern: String,
    matcher: matchit::Router<()>,
    filter: Option<Box<dyn Filter>>,
    handler: Arc<dyn RequestHandler>,
}

/// The innermost handler of a router: the route table itself.
struct Dispatcher {
    routes: Vec<Route>,
    not_found: Option<Arc<dyn RequestHandler>>,
}

pub struct Router {
    pipeline: Pipeline,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }
}

#[async_trait]
impl RequestHandler for Router {
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        self.pipeline.invoke(ctx).await
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn invoke(&self, ctx: &RequestContext) -> Result<Reply, Error> {
        let path = normalize(ctx.uri().path());

        for route in &self.routes {
            if !route.method.matches(ctx.method()) {
                continue;
            }
            let Ok(matched) = route.matcher.at(path) else {
                continue;
            };
            if route.filter.as_ref().is_some_and(|filter| !filter.check(ctx)) {
                continue;
            }

            let params = matched.params.iter().map(|(name, value)| (name.to_string(), decode(value))).collect::<PathParams>();
            debug!(method = %route.method, pattern = %route.pattern, path, "matched route");
            ctx.insert(&*ROUTE_PARAMS, params)?;
            return route.handler.invoke(ctx).await;
        }

        trace!(method = %ctx.method(), path, "no route matched");
        match &self.not_found {
            Some(not_found) => not_found.invoke(ctx).await,
            None => Err(Error::NotFound),
        }
    }
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8().map_or_else(|_| value.to_string(), |decoded| decoded.into_owned())
}

/// Drops trailing slashes, the root path stays `/`.
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Joins the router prefix and a route pattern with exactly one `/` between them.
fn join(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let pattern = pattern.trim_start_matches('/');
    let joined = match (prefix.is_empty(), pattern.is_empty()) {
        (true, _) => format!("/{pattern}"),
        (false, true) => format!("/{prefix}"),
        (false, false) => format!("/{prefix}/{pattern}"),
    };
    normalize(&joined).to_string()
}

/// Rewrites `:name` and `*name` segments into the matcher syntax, escaping literal braces.
fn to_matcher_syntax(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "wildcard" } else { name };
                format!("{{*{name}}}")
            } else {
                segment.replace('{', "{{").replace('}', "}}")
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

struct RouteBuilder {
    method: MethodFilter,
    pattern: String,
    filter: Option<Box<dyn Filter>>,
    handler: Arc<dyn RequestHandler>,
}

pub struct RouterBuilder {
    prefix: String,
    routes: Vec<RouteBuilder>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: Option<Arc<dyn RequestHandler>>,
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        pub fn $name<H: RequestHandler + 'static>(self, pattern: impl Into<String>, handler: H) -> Self {
            self.route((pattern, Method::$method), handler)
        }
    };
}

impl RouterBuilder {
    fn new() -> Self {
        Self { prefix: String::new(), routes: Vec::new(), middleware: Vec::new(), not_found: None }
    }

    /// Registers a route; routes registered first take precedence.
    pub fn route<H: RequestHandler + 'static>(self, spec: impl IntoRouteSpec, handler: H) -> Self {
        self.register(spec, None, handler)
    }

    /// Registers a route that additionally requires `filter` to accept the request.
    pub fn route_with<F, H>(self, spec: impl IntoRouteSpec, filter: F, handler: H) -> Self
    where
        F: Filter + 'static,
        H: RequestHandler + 'static,
    {
        self.register(spec, Some(Box::new(filter)), handler)
    }

    fn register<H: RequestHandler + 'static>(
        mut self,
        spec: impl IntoRouteSpec,
        filter: Option<Box<dyn Filter>>,
        handler: H,
    ) -> Self {
        let (method, pattern) = spec.into_route_spec();
        self.routes.push(RouteBuilder { method, pattern, filter, handler: Arc::new(handler) });
        self
    }

    method_route!(get, GET);
    method_route!(post, POST);
    method_route!(put, PUT);
    method_route!(patch, PATCH);
    method_route!(delete, DELETE);

    /// A route answering every method.
    pub fn any<H: RequestHandler + 'static>(self, pattern: impl Into<String>, handler: H) -> Self {
        self.route((pattern, MethodFilter::Any), handler)
    }

    /// Mounts every route under `prefix`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Wraps every dispatch of this router, not-found included; the first added is the outermost.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn not_found<H: RequestHandler + 'static>(mut self, handler: H) -> Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Router, Error> {
        let mut routes = Vec::with_capacity(self.routes.len());

        for route in self.routes {
            let pattern = join(&self.prefix, &route.pattern);
            let mut matcher = matchit::Router::new();
            matcher.insert(to_matcher_syntax(&pattern), ()).map_err(|e| Error::invalid_route(&pattern, e))?;

            routes.push(Route { method: route.method, pattern, matcher, filter: route.filter, handler: route.handler });
        }

        let dispatcher = Dispatcher { routes, not_found: self.not_found };
        Ok(Router { pipeline: compose(self.middleware, dispatcher) })
    }
}
