//! The request listener: context creation, the error boundary and materialization.
//!
//! [`App::handle`] is what a transport calls for every inbound request. It creates the
//! [`RequestContext`], runs the middleware pipeline and its terminal handler, turns an
//! uncaught [`Error`] into an error [`Reply`] according to the [`ErrorConfig`], writes the
//! reply onto the response and finally unloads the context.

use crate::body::{req_body, ResponseBody};
use crate::context::RequestContext;
use crate::error::{BoxError, Error};
use crate::handler::RequestHandler;
use crate::middleware::{compose, Middleware, Pipeline};
use crate::reply::{Reply, TEXT_UTF_8};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response};
use http_body::Body as HttpBody;
use serde_json::json;
use std::env;
use std::error::Error as StdError;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, warn};

/// The environment variable read by [`ErrorConfig::from_env`].
pub const ENV_VAR: &str = "MICRO_SELECT_ENV";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Error bodies describe the error and its causes.
    #[default]
    Development,
    /// Error bodies never leak the message of a server error.
    Production,
}

/// How uncaught errors are answered.
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    mode: Mode,
    json: bool,
    quiet: bool,
}

impl ErrorConfig {
    pub fn development() -> Self {
        Self { mode: Mode::Development, ..Self::default() }
    }

    pub fn production() -> Self {
        Self { mode: Mode::Production, ..Self::default() }
    }

    /// `production` and `development` select the mode, `test` is development without logging.
    pub fn from_env() -> Self {
        match env::var(ENV_VAR).as_deref() {
            Ok("production") => Self::production(),
            Ok("test") => Self::development().quiet(),
            _ => Self::development(),
        }
    }

    /// Answer errors with `{"message": ..}` instead of plain text.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Do not log uncaught errors.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Logs `e` and builds the reply answering it.
    pub fn error_reply(&self, ctx: &RequestContext, e: &Error) -> Reply {
        let status = e.status();

        if !self.quiet {
            if status.is_server_error() {
                error!(method = %ctx.method(), uri = %ctx.uri(), status = status.as_u16(), cause = %e, "request failed");
            } else {
                warn!(method = %ctx.method(), uri = %ctx.uri(), status = status.as_u16(), cause = %e, "request rejected");
            }
        }

        let message = match self.mode {
            Mode::Development => describe(e),
            Mode::Production if status.is_client_error() => e.to_string(),
            Mode::Production => status.canonical_reason().unwrap_or("Internal Server Error").to_string(),
        };

        if self.json {
            Reply::json(json!({ "message": message })).set_status_code(status)
        } else {
            let mut headers = http::HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_UTF_8));
            Reply::error(status, message).set_headers(headers)
        }
    }
}

/// `Error: <message>` followed by one `caused by:` line per source.
fn describe(e: &Error) -> String {
    let mut description = format!("Error: {e}");
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(description, "\ncaused by: {cause}");
        source = cause.source();
    }
    description
}

/// A request listener built from a handler, its middleware and an error policy.
#[derive(Clone)]
pub struct App {
    pipeline: Pipeline,
    errors: ErrorConfig,
}

pub struct AppBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
    errors: ErrorConfig,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder { middleware: Vec::new(), errors: ErrorConfig::from_env() }
    }

    /// An app running `handler` without middleware.
    pub fn new<H: RequestHandler + 'static>(handler: H) -> Self {
        Self::builder().build(handler)
    }

    /// Handles one request.
    ///
    /// Errors raised while the reply is written (a failing delegate reply for instance)
    /// are returned to the transport instead of being answered.
    pub async fn handle<B>(&self, request: Request<B>) -> Result<Response<ResponseBody>, Error>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (head, body) = request.into_parts();
        let ctx = RequestContext::from_parts(head, req_body(body));

        let reply = match self.pipeline.invoke(&ctx).await {
            Ok(reply) => reply,
            Err(e) => self.errors.error_reply(&ctx, &e),
        };

        // a delegate keeps using the context, it unloads it once done
        if reply.is_delegate() {
            return reply.into_response(&ctx).await;
        }

        let response = reply.into_response(&ctx).await;
        ctx.unload();
        response
    }
}

impl AppBuilder {
    /// Adds a middleware; the first added is the outermost.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn build<H: RequestHandler + 'static>(self, handler: H) -> App {
        App { pipeline: compose(self.middleware, handler), errors: self.errors }
    }
}
