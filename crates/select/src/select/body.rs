use crate::body::req_body;
use crate::context::{CacheKey, RequestContext};
use crate::error::{BoxError, Error};
use crate::limit::ByteLimit;
use crate::selector::Selector;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{future, stream, StreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use http_body::Frame;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use mime::Mime;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

static RAW_BODY: Lazy<CacheKey<Bytes>> = Lazy::new(CacheKey::new);
static JSON_VALUE: Lazy<CacheKey<serde_json::Value>> = Lazy::new(CacheKey::new);

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// How a request body is read.
#[derive(Debug, Clone)]
pub struct BodyOptions {
    /// Largest accepted body, checked against `content-length` and while reading
    pub limit: ByteLimit,
    /// Charset of text bodies when the `content-type` does not name one
    pub encoding: String,
    /// Parse json and form bodies whatever their `content-type`
    pub skip_content_type_check: bool,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self { limit: ByteLimit::default(), encoding: "utf-8".to_string(), skip_content_type_check: false }
    }
}

impl BodyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: ByteLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn skip_content_type_check(mut self) -> Self {
        self.skip_content_type_check = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    fn lookup(name: &str) -> Result<Self, Error> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "latin1" | "iso-8859-1" => Ok(Charset::Latin1),
            "ascii" | "us-ascii" => Ok(Charset::Ascii),
            _ => Err(Error::unsupported_encoding(name)),
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<String, Error> {
        match self {
            Charset::Utf8 => std::str::from_utf8(bytes).map(str::to_string).map_err(Error::invalid_body),
            Charset::Latin1 => Ok(bytes.iter().copied().map(char::from).collect()),
            Charset::Ascii if bytes.is_ascii() => Ok(bytes.iter().copied().map(char::from).collect()),
            Charset::Ascii => Err(Error::invalid_body("body is not valid ascii")),
        }
    }
}

fn content_type(headers: &HeaderMap) -> Option<Mime> {
    headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).and_then(|value| value.parse().ok())
}

fn check_content_type(
    ctx: &RequestContext,
    options: &BodyOptions,
    expected: &str,
    accept: impl Fn(&Mime) -> bool,
) -> Result<(), Error> {
    if options.skip_content_type_check {
        return Ok(());
    }

    match content_type(ctx.headers()) {
        Some(mime) if accept(&mime) => Ok(()),
        Some(mime) => Err(Error::unsupported_media_type(expected, mime)),
        None => Err(Error::unsupported_media_type(expected, "none")),
    }
}

/// Buffers the whole request body, at most once per request.
///
/// The first reader consumes the transport body; everyone after gets the cached bytes,
/// checked against their own limit. A reader whose limit is exceeded puts what it read
/// back in front of the rest of the body, so a later reader with a larger limit still
/// sees all of it.
async fn read_bytes(ctx: &RequestContext, limit: &ByteLimit) -> Result<Bytes, Error> {
    let bytes = ctx.get_or_compute(&*RAW_BODY, || read_to_limit(ctx, limit)).await?;
    if limit.is_exceeded_by(bytes.len() as u64) {
        return Err(Error::payload_too_large(limit));
    }
    Ok(Bytes::clone(&bytes))
}

async fn read_to_limit(ctx: &RequestContext, limit: &ByteLimit) -> Result<Bytes, Error> {
    let declared = ctx
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    if declared.is_some_and(|length| limit.is_exceeded_by(length)) {
        trace!(?declared, %limit, "declared content-length exceeds the body limit");
        return Err(Error::payload_too_large(limit));
    }

    let Some(mut body) = ctx.take_body().await? else {
        return Err(Error::invalid_body("request body has already been consumed"));
    };

    let mut buf = BytesMut::new();
    loop {
        let Some(frame) = body.frame().await else {
            break;
        };
        let frame = frame.map_err(Error::invalid_body)?;
        let Ok(data) = frame.into_data() else {
            continue;
        };

        buf.extend_from_slice(&data);
        if limit.is_exceeded_by(buf.len() as u64) {
            trace!(read = buf.len(), %limit, "body exceeds the limit, restoring it");
            let read = stream::once(future::ready(Ok::<_, BoxError>(Frame::data(buf.freeze()))));
            ctx.restore_body(req_body(StreamBody::new(read.chain(BodyStream::new(body))))).await?;
            return Err(Error::payload_too_large(limit));
        }
    }

    Ok(buf.freeze())
}

async fn read_text(ctx: &RequestContext, options: &BodyOptions) -> Result<String, Error> {
    let charset = match content_type(ctx.headers()).as_ref().and_then(|mime| mime.get_param(mime::CHARSET)) {
        Some(name) => Charset::lookup(name.as_str())?,
        None => Charset::lookup(&options.encoding)?,
    };
    let bytes = read_bytes(ctx, &options.limit).await?;
    charset.decode(&bytes)
}

/// The raw request body.
#[derive(Debug, Clone, Default)]
pub struct BodyBytes {
    options: BodyOptions,
}

pub fn body_bytes(options: BodyOptions) -> BodyBytes {
    BodyBytes { options }
}

#[async_trait]
impl Selector for BodyBytes {
    type Output = Bytes;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        read_bytes(ctx, &self.options.limit).await
    }
}

/// The request body decoded as text.
#[derive(Debug, Clone, Default)]
pub struct BodyText {
    options: BodyOptions,
}

pub fn body_text(options: BodyOptions) -> BodyText {
    BodyText { options }
}

#[async_trait]
impl Selector for BodyText {
    type Output = String;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        read_text(ctx, &self.options).await
    }
}

/// The json request body deserialized into `T`.
///
/// The parsed document is cached, so several `json_body` selectors with different
/// targets parse the body once. An empty body reads as `{}`.
pub struct JsonBody<T> {
    options: BodyOptions,
    _phantom: PhantomData<fn() -> T>,
}

pub fn json_body<T>(options: BodyOptions) -> JsonBody<T> {
    JsonBody { options, _phantom: PhantomData }
}

impl<T> Clone for JsonBody<T> {
    fn clone(&self) -> Self {
        json_body(self.options.clone())
    }
}

#[async_trait]
impl<T> Selector for JsonBody<T>
where
    T: DeserializeOwned + Send,
{
    type Output = T;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        check_content_type(ctx, &self.options, "application/json", |mime| {
            mime.essence_str() == mime::APPLICATION_JSON.essence_str()
                || mime.suffix().is_some_and(|suffix| suffix == mime::JSON)
        })?;

        let value = json_value(ctx, &self.options).await?;
        Ok(<T as Deserialize>::deserialize(&*value)?)
    }
}

async fn json_value(ctx: &RequestContext, options: &BodyOptions) -> Result<Arc<serde_json::Value>, Error> {
    let text = read_text(ctx, options).await?;
    ctx.get_or_compute(&*JSON_VALUE, || async move {
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        Ok::<_, Error>(serde_json::from_str::<serde_json::Value>(&text)?)
    })
    .await
}

/// The url-encoded form body deserialized into `T`.
pub struct FormBody<T> {
    options: BodyOptions,
    _phantom: PhantomData<fn() -> T>,
}

pub fn form_body<T>(options: BodyOptions) -> FormBody<T> {
    FormBody { options, _phantom: PhantomData }
}

impl<T> Clone for FormBody<T> {
    fn clone(&self) -> Self {
        form_body(self.options.clone())
    }
}

#[async_trait]
impl<T> Selector for FormBody<T>
where
    T: DeserializeOwned + Send,
{
    type Output = T;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        check_content_type(ctx, &self.options, FORM_URLENCODED, |mime| mime.essence_str() == FORM_URLENCODED)?;

        let bytes = read_bytes(ctx, &self.options.limit).await?;
        serde_urlencoded::from_bytes(&bytes).map_err(Error::invalid_form)
    }
}
