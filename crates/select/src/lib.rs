//! Compose selectors and middleware into an async HTTP request listener.
//!
//! A handler is an ordered tuple of [`Selector`]s plus an async function receiving
//! their outputs as positional arguments. Selectors read the request through a
//! [`RequestContext`] whose cache lets independent selectors share one parse of the
//! url, the query, the cookies or the body. [`Middleware`] wrap the handler in list
//! order, the first being the outermost, and a [`Router`] dispatches to handlers by
//! method and path. [`App`] ties it together and answers uncaught errors.
//!
//! ```no_run
//! use micro_select::select::route_param;
//! use micro_select::{handler, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .get("/hello/:name", handler((route_param("name"),), |name: Option<String>| async move {
//!             format!("hello {}", name.unwrap_or_default())
//!         }))
//!         .build()
//!         .unwrap();
//!
//!     Server::builder().address("127.0.0.1:3000").unwrap().handler(router).build().unwrap().start().await;
//! }
//! ```

mod app;
mod body;
mod context;
mod error;
mod fn_trait;
mod handler;
mod limit;
mod reply;
mod responder;
mod selector;
mod server;

pub mod cookie;
pub mod filter;
pub mod middleware;
pub mod router;
pub mod select;

pub use app::{App, AppBuilder, ErrorConfig, Mode, ENV_VAR};
pub use body::{req_body, OptionReqBody, ReqBody, ResponseBody};
pub use context::{CacheKey, PathParams, RequestContext};
pub use cookie::{CookieOptions, Cookies, SameSite};
pub use error::{BoxError, Error};
pub use fn_trait::{FnTrait, MiddlewareFnTrait};
pub use handler::{handler, FnHandler, RequestHandler};
pub use limit::{ByteLimit, ParseByteLimitError};
pub use middleware::{compose, middleware_fn, Middleware, Next, Pipeline};
pub use reply::{Delegate, RawResponse, Reply, ReplyBody, SharedStream};
pub use responder::IntoReply;
pub use router::{Router, RouterBuilder};
pub use selector::{memo, optional, selector_fn, Memo, Optional, Selector, SelectorFn};
pub use server::{Server, ServerBuildError, ServerBuilder};

