//! Immutable description of the response a handler wants to send.
//!
//! A [`Reply`] carries a status (default 200), headers and a [`ReplyBody`]. Every
//! `set_*`/`update_*` method returns a new reply and leaves the receiver untouched.
//!
//! When the pipeline finishes, [`Reply::into_response`] materializes the reply onto the
//! transport: an explicit `content-type` wins over the one derived from the body, while
//! `content-length` is always recomputed from the bytes sent, and dropped for streams.
//! A delegate reply ([`Reply::raw`]) instead hands a [`RawResponse`] to user code, which
//! writes the head and the body chunks itself.

use crate::body::ResponseBody;
use crate::context::RequestContext;
use crate::cookie::{self, CookieOptions};
use crate::error::{BoxError, Error};
use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

pub(crate) const TEXT_UTF_8: &str = "text/plain; charset=utf-8";
pub(crate) const OCTET_STREAM: &str = "application/octet-stream";
pub(crate) const JSON_UTF_8: &str = "application/json; charset=utf-8";

// characters a browser would escape in a location, `%` is kept to avoid double encoding
const LOCATION_ESCAPE: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'\\').add(b'^').add(b'`').add(b'{').add(b'|').add(b'}');

type DelegateFn = dyn Fn(RequestContext, RawResponse) -> BoxFuture<'static, Result<(), Error>> + Send + Sync;
type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// The body of a [`Reply`].
#[derive(Clone)]
pub enum ReplyBody {
    Empty,
    Text(String),
    Binary(Bytes),
    Json(serde_json::Value),
    Stream(SharedStream),
    Delegate(Delegate),
}

/// A byte stream shared between clones of a reply; only the first materialization reads it.
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl SharedStream {
    pub(crate) fn take(&self) -> Option<ByteStream> {
        self.inner.lock().ok().and_then(|mut guard| guard.take())
    }
}

/// User code taking full control of the response transport.
#[derive(Clone)]
pub struct Delegate {
    f: Arc<DelegateFn>,
}

#[derive(Clone)]
pub struct Reply {
    body: ReplyBody,
    status: StatusCode,
    headers: HeaderMap,
}

impl Reply {
    /// A 200 reply with `body`.
    pub fn new(body: impl Into<ReplyBody>) -> Self {
        Self { body: body.into(), status: StatusCode::OK, headers: HeaderMap::new() }
    }

    /// A 200 reply without body.
    pub fn empty() -> Self {
        Self::new(ReplyBody::Empty)
    }

    /// Same as [`Reply::new`] with the status first, reads better at error sites.
    pub fn error(status: StatusCode, body: impl Into<ReplyBody>) -> Self {
        Self { body: body.into(), status, headers: HeaderMap::new() }
    }

    /// A 302 redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::redirect_with(location, StatusCode::FOUND, HeaderMap::new())
    }

    /// A redirect with an explicit status and extra headers; the body is always empty.
    pub fn redirect_with(location: &str, status: StatusCode, extra_headers: HeaderMap) -> Self {
        let mut headers = extra_headers;
        headers.insert(LOCATION, encode_location(location));
        Self { body: ReplyBody::Empty, status, headers }
    }

    /// A reply whose structured body is sent as json.
    pub fn json(value: impl Into<serde_json::Value>) -> Self {
        Self::new(ReplyBody::Json(value.into()))
    }

    /// Serializes `value` into a json reply.
    pub fn try_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    /// A reply streaming `stream`; its length is unknown so no `content-length` is sent.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let stream: ByteStream = stream.map(|item| item.map_err(Into::into)).boxed();
        Self::new(ReplyBody::Stream(SharedStream { inner: Arc::new(Mutex::new(Some(stream))) }))
    }

    /// A reply that lets `f` write the response itself.
    ///
    /// The head is sent on the first [`RawResponse::write`], on [`RawResponse::end`] or
    /// when `f` returns. An error returned by `f` is not converted into a reply, it is
    /// reported to the transport.
    pub fn raw<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let delegate = move |ctx: RequestContext, raw: RawResponse| -> BoxFuture<'static, Result<(), Error>> {
            Box::pin(f(ctx, raw))
        };
        Self::new(ReplyBody::Delegate(Delegate { f: Arc::new(delegate) }))
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn is_delegate(&self) -> bool {
        matches!(self.body, ReplyBody::Delegate(_))
    }

    pub fn set_status_code(&self, status: StatusCode) -> Self {
        Self { status, ..self.clone() }
    }

    pub fn set_body(&self, body: impl Into<ReplyBody>) -> Self {
        Self { body: body.into(), ..self.clone() }
    }

    /// Replaces every header.
    pub fn set_headers(&self, headers: HeaderMap) -> Self {
        Self { headers, ..self.clone() }
    }

    /// Merges `headers` into the current ones; on a name collision the new values win.
    pub fn update_headers(&self, headers: HeaderMap) -> Self {
        let mut merged = self.headers.clone();
        let mut current = None;
        for (name, value) in headers {
            // `None` continues the previous name, the first value of a name replaces the old ones
            match name {
                Some(name) => {
                    merged.insert(name.clone(), value);
                    current = Some(name);
                }
                None => {
                    if let Some(name) = &current {
                        merged.append(name.clone(), value);
                    }
                }
            }
        }
        Self { headers: merged, ..self.clone() }
    }

    /// Appends a `set-cookie` header, keeping the cookies already set.
    pub fn set_cookie(&self, name: &str, value: &str, options: &CookieOptions) -> Result<Self, Error> {
        let cookie = cookie::serialize(name, value, options)?;
        let value = HeaderValue::try_from(cookie).map_err(Error::internal)?;
        let mut headers = self.headers.clone();
        headers.append(SET_COOKIE, value);
        Ok(Self { headers, ..self.clone() })
    }

    /// Materializes this reply onto the transport.
    pub async fn into_response(self, ctx: &RequestContext) -> Result<Response<ResponseBody>, Error> {
        let Reply { body, status, mut headers } = self;

        let body = match body {
            ReplyBody::Empty => ResponseBody::empty(),
            ReplyBody::Text(text) => {
                default_content_type(&mut headers, TEXT_UTF_8);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(text.len()));
                ResponseBody::from(text)
            }
            ReplyBody::Binary(bytes) => {
                default_content_type(&mut headers, OCTET_STREAM);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                ResponseBody::from(bytes)
            }
            ReplyBody::Json(value) => {
                let bytes = Bytes::from(serde_json::to_vec(&value)?);
                default_content_type(&mut headers, JSON_UTF_8);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                ResponseBody::from(bytes)
            }
            ReplyBody::Stream(stream) => {
                default_content_type(&mut headers, OCTET_STREAM);
                headers.remove(CONTENT_LENGTH);
                match stream.take() {
                    Some(stream) => ResponseBody::stream(StreamBody::new(stream.map(|item| item.map(Frame::data)))),
                    None => return Err(Error::internal("the stream of this reply has already been sent")),
                }
            }
            ReplyBody::Delegate(delegate) => return delegate.run(ctx.clone(), status, headers).await,
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn default_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

fn encode_location(location: &str) -> HeaderValue {
    let encoded = utf8_percent_encode(location, LOCATION_ESCAPE).to_string();
    HeaderValue::try_from(encoded).unwrap_or_else(|_| HeaderValue::from_static("/"))
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("status", &self.status).field("headers", &self.headers).field("body", &self.body).finish()
    }
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ReplyBody::Binary(bytes) => f.debug_tuple("Binary").field(bytes).finish(),
            ReplyBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream"),
            ReplyBody::Delegate(_) => f.write_str("Delegate"),
        }
    }
}

impl From<()> for ReplyBody {
    fn from((): ()) -> Self {
        ReplyBody::Empty
    }
}

impl From<&'static str> for ReplyBody {
    fn from(value: &'static str) -> Self {
        ReplyBody::Text(value.to_string())
    }
}

impl From<String> for ReplyBody {
    fn from(value: String) -> Self {
        ReplyBody::Text(value)
    }
}

impl From<Bytes> for ReplyBody {
    fn from(value: Bytes) -> Self {
        ReplyBody::Binary(value)
    }
}

impl From<Vec<u8>> for ReplyBody {
    fn from(value: Vec<u8>) -> Self {
        ReplyBody::Binary(Bytes::from(value))
    }
}

impl From<serde_json::Value> for ReplyBody {
    fn from(value: serde_json::Value) -> Self {
        ReplyBody::Json(value)
    }
}

struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

// the head waits here until it is sent, or parked by a dropped `RawResponse`
struct HeadSlot {
    sender: Option<oneshot::Sender<Result<Head, Error>>>,
    parked: Option<Head>,
}

impl HeadSlot {
    fn send(&mut self, head: Result<Head, Error>) -> bool {
        match self.sender.take() {
            Some(sender) => {
                if sender.send(head).is_err() {
                    debug!("response head receiver has gone");
                }
                true
            }
            None => false,
        }
    }
}

/// Direct access to the response transport, handed to delegate replies.
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    head: Arc<Mutex<HeadSlot>>,
    body: mpsc::Sender<Result<Bytes, BoxError>>,
}

impl RawResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status; ignored once the head has been sent.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The headers to send; changes are ignored once the head has been sent.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn is_head_sent(&self) -> bool {
        self.head.lock().map(|slot| slot.sender.is_none()).unwrap_or(true)
    }

    /// Sends the head if needed, then one body chunk.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        self.send_head();
        self.body.send(Ok(chunk.into())).await.map_err(|_| Error::internal("response body has been closed"))
    }

    /// Sends the head if needed and finishes the body.
    pub fn end(mut self) {
        self.send_head();
        self.body.close_channel();
    }

    fn send_head(&mut self) {
        if let Ok(mut slot) = self.head.lock() {
            let head = Head { status: self.status, headers: std::mem::take(&mut self.headers) };
            slot.send(Ok(head));
        }
    }
}

impl Drop for RawResponse {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.head.lock() {
            if slot.sender.is_some() {
                slot.parked = Some(Head { status: self.status, headers: std::mem::take(&mut self.headers) });
            }
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse").field("status", &self.status).field("headers", &self.headers).finish_non_exhaustive()
    }
}

impl Delegate {
    async fn run(self, ctx: RequestContext, status: StatusCode, headers: HeaderMap) -> Result<Response<ResponseBody>, Error> {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(16);

        let head = Arc::new(Mutex::new(HeadSlot { sender: Some(head_tx), parked: None }));
        let raw = RawResponse { status, headers, head: Arc::clone(&head), body: body_tx.clone() };

        tokio::spawn(async move {
            let mut body_tx = body_tx;
            let outcome = (self.f)(ctx.clone(), raw).await;

            let failed_after_head = match head.lock() {
                Ok(mut slot) => match outcome {
                    Ok(()) => {
                        let parked = slot.parked.take().unwrap_or(Head { status: StatusCode::OK, headers: HeaderMap::new() });
                        slot.send(Ok(parked));
                        false
                    }
                    Err(e) => {
                        error!(cause = %e, "delegate reply failed");
                        !slot.send(Err(e))
                    }
                },
                Err(_) => {
                    error!("response head of delegate reply is poisoned");
                    true
                }
            };

            if failed_after_head {
                let aborted: BoxError = "delegate reply failed after sending the head".into();
                if body_tx.send(Err(aborted)).await.is_err() {
                    debug!("response body receiver has gone");
                }
            }
            ctx.unload();
        });

        let head = head_rx.await.map_err(|_| Error::internal("delegate reply dropped the response head"))??;

        let mut response = Response::new(ResponseBody::stream(StreamBody::new(body_rx.map(|item| item.map(Frame::data)))));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::{RawResponse, Reply, ReplyBody};
    use crate::context::tests::get;
    use crate::cookie::CookieOptions;
    use crate::error::Error;
    use bytes::Bytes;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE};
    use http::{HeaderMap, HeaderValue, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::convert::Infallible;

    async fn body_of(reply: Reply) -> (http::response::Parts, Bytes) {
        let ctx = get("/");
        let response = reply.into_response(&ctx).await.unwrap();
        let (parts, body) = response.into_parts();
        (parts, body.collect().await.unwrap().to_bytes())
    }

    #[test]
    fn test_immutable() {
        let original = Reply::new("x");
        let created = original.set_status_code(StatusCode::CREATED);

        assert_eq!(original.status(), StatusCode::OK);
        assert_eq!(created.status(), StatusCode::CREATED);

        let with_body = original.set_body("y");
        assert!(matches!(original.body(), ReplyBody::Text(text) if text == "x"));
        assert!(matches!(with_body.body(), ReplyBody::Text(text) if text == "y"));
    }

    #[test]
    fn test_error_and_redirect() {
        let error = Reply::error(StatusCode::BAD_REQUEST, "bad");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let redirect = Reply::redirect("https://example.com");
        assert_eq!(redirect.status(), StatusCode::FOUND);
        assert_eq!(redirect.headers().get(LOCATION).unwrap(), "https://example.com");
        assert!(matches!(redirect.body(), ReplyBody::Empty));

        let mut extra = HeaderMap::new();
        extra.insert("x-reason", HeaderValue::from_static("moved"));
        let redirect = Reply::redirect_with("/new place", StatusCode::MOVED_PERMANENTLY, extra);
        assert_eq!(redirect.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(redirect.headers().get(LOCATION).unwrap(), "/new%20place");
        assert_eq!(redirect.headers().get("x-reason").unwrap(), "moved");
    }

    #[test]
    fn test_headers() {
        let mut first = HeaderMap::new();
        first.insert("a", HeaderValue::from_static("1"));
        first.insert("b", HeaderValue::from_static("2"));
        let reply = Reply::new("x").set_headers(first);

        let mut second = HeaderMap::new();
        second.insert("b", HeaderValue::from_static("3"));
        second.insert("c", HeaderValue::from_static("4"));
        let updated = reply.update_headers(second.clone());

        assert_eq!(updated.headers().get("a").unwrap(), "1");
        assert_eq!(updated.headers().get("b").unwrap(), "3");
        assert_eq!(updated.headers().get("c").unwrap(), "4");
        assert_eq!(reply.headers().get("b").unwrap(), "2");

        let replaced = updated.set_headers(second);
        assert!(replaced.headers().get("a").is_none());
    }

    #[test]
    fn test_set_cookie_appends() {
        let reply = Reply::new("x")
            .set_cookie("a", "1", &CookieOptions::new())
            .unwrap()
            .set_cookie("b", "2", &CookieOptions::new().http_only())
            .unwrap();

        let cookies: Vec<_> = reply.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2; HttpOnly"]);

        let mut other = HeaderMap::new();
        other.insert("x-other", HeaderValue::from_static("v"));
        let updated = reply.update_headers(other);
        assert_eq!(updated.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn test_materialize_empty() {
        let (parts, body) = body_of(Reply::empty().set_status_code(StatusCode::NO_CONTENT)).await;
        assert_eq!(parts.status, StatusCode::NO_CONTENT);
        assert!(parts.headers.get(CONTENT_TYPE).is_none());
        assert!(parts.headers.get(CONTENT_LENGTH).is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_materialize_text_counts_bytes() {
        let (parts, body) = body_of(Reply::new("héllo".to_string())).await;
        assert_eq!(parts.headers.get(CONTENT_LENGTH).unwrap(), "6");
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        assert_eq!(body, Bytes::from("héllo"));
    }

    #[tokio::test]
    async fn test_materialize_binary() {
        let (parts, body) = body_of(Reply::new(vec![1u8, 2, 3])).await;
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert_eq!(parts.headers.get(CONTENT_LENGTH).unwrap(), "3");
        assert_eq!(body.as_ref(), [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_materialize_json() {
        let (parts, body) = body_of(Reply::json(json!({"ok": true}))).await;
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "application/json; charset=utf-8");
        assert_eq!(parts.headers.get(CONTENT_LENGTH).unwrap(), "11");
        assert_eq!(body, Bytes::from(r#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_explicit_content_type_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        let (parts, _) = body_of(Reply::json(json!([1])).set_headers(headers)).await;
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "application/vnd.api+json");
    }

    #[tokio::test]
    async fn test_content_length_recomputed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        let (parts, body) = body_of(Reply::new("<p>hi</p>".to_string()).set_headers(headers)).await;
        assert_eq!(parts.headers.get(CONTENT_LENGTH).unwrap(), "9");
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(body.len(), 9);
    }

    #[tokio::test]
    async fn test_materialize_stream() {
        let chunks = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from("a")), Ok(Bytes::from("b"))]);
        let (parts, body) = body_of(Reply::stream(chunks)).await;
        assert_eq!(parts.headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert!(parts.headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(body, Bytes::from("ab"));
    }

    #[tokio::test]
    async fn test_stream_is_sent_once() {
        let chunks = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from("a"))]);
        let reply = Reply::stream(chunks);
        let copy = reply.clone();

        let ctx = get("/");
        assert!(reply.into_response(&ctx).await.is_ok());
        assert!(copy.into_response(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_delegate_writes_response() {
        let reply = Reply::raw(|_ctx, mut raw: RawResponse| async move {
            raw.set_status(StatusCode::ACCEPTED);
            raw.headers_mut().insert("x-delegate", HeaderValue::from_static("yes"));
            raw.write("hello ").await?;
            raw.write("world").await?;
            raw.end();
            Ok::<(), Error>(())
        });
        assert!(reply.is_delegate());

        let (parts, body) = body_of(reply).await;
        assert_eq!(parts.status, StatusCode::ACCEPTED);
        assert_eq!(parts.headers.get("x-delegate").unwrap(), "yes");
        assert_eq!(body, Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_delegate_without_write_sends_parked_head() {
        let reply = Reply::raw(|_ctx, mut raw: RawResponse| async move {
            raw.set_status(StatusCode::NO_CONTENT);
            Ok::<(), Error>(())
        });

        let (parts, body) = body_of(reply).await;
        assert_eq!(parts.status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_delegate_error_reaches_transport() {
        let reply = Reply::raw(|_ctx, _raw| async move { Err::<(), Error>(Error::invalid_body("broken delegate")) });

        let ctx = get("/");
        let result = reply.into_response(&ctx).await;
        assert!(matches!(result, Err(Error::InvalidBody { .. })));
    }

    #[tokio::test]
    async fn test_delegate_unloads_context_when_done() {
        let ctx = get("/");
        let reply = Reply::raw(|_ctx, raw: RawResponse| async move {
            raw.end();
            Ok::<(), Error>(())
        });
        let response = reply.into_response(&ctx).await.unwrap();
        response.into_body().collect().await.unwrap();

        tokio::task::yield_now().await;
        for _ in 0..10 {
            if !ctx.is_loaded() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!ctx.is_loaded());
    }
}
