//! Request predicates deciding whether a route applies.

use crate::context::RequestContext;
use crate::error::Error;
use http::{HeaderName, HeaderValue, Method};
use std::fmt;
use std::str::FromStr;

pub trait Filter: Send + Sync {
    fn check(&self, ctx: &RequestContext) -> bool;
}

struct FnFilter<F: Fn(&RequestContext) -> bool>(F);

impl<F: Fn(&RequestContext) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn check(&self, ctx: &RequestContext) -> bool {
        (self.0)(ctx)
    }
}

pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// compose filters with *AND* logic, an empty [`AllFilter`] accepts everything
#[derive(Default)]
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

pub fn all_filter() -> AllFilter {
    AllFilter::default()
}

impl AllFilter {
    pub fn and<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AllFilter {
    fn check(&self, ctx: &RequestContext) -> bool {
        self.filters.iter().all(|filter| filter.check(ctx))
    }
}

/// Which methods a route answers: one method, or any method (`*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    Only(Method),
    Any,
}

impl MethodFilter {
    #[inline]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Only(expected) => expected == method,
            MethodFilter::Any => true,
        }
    }
}

impl Filter for MethodFilter {
    fn check(&self, ctx: &RequestContext) -> bool {
        self.matches(ctx.method())
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::Only(method)
    }
}

/// `*` is any method, everything else must be a valid method name.
impl FromStr for MethodFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(MethodFilter::Any);
        }
        Method::from_bytes(s.to_ascii_uppercase().as_bytes())
            .map(MethodFilter::Only)
            .map_err(|e| Error::invalid_route(s, e))
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::Only(method) => fmt::Display::fmt(method, f),
            MethodFilter::Any => f.write_str("*"),
        }
    }
}

/// Accepts requests carrying `name: value`.
pub fn header(name: HeaderName, value: HeaderValue) -> HeaderFilter {
    HeaderFilter(name, value)
}

pub struct HeaderFilter(HeaderName, HeaderValue);

impl Filter for HeaderFilter {
    fn check(&self, ctx: &RequestContext) -> bool {
        ctx.headers().get_all(&self.0).iter().any(|value| *value == self.1)
    }
}
