use crate::context::RequestContext;
use crate::error::{BoxError, Error};
use crate::middleware::{Middleware, Next};
use crate::reply::{Reply, ReplyBody, JSON_UTF_8, OCTET_STREAM, TEXT_UTF_8};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use futures::Stream;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderValue, StatusCode};
use pin_project_lite::pin_project;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::trace;
use zstd::stream::write::Encoder as ZstdEncoder;
// encoder layout inspired by actix-http: https://github.com/actix/actix-web/blob/master/actix-http/src/encoding/encoder.rs

/// Buffered bodies smaller than this are sent as they are.
const MIN_COMPRESS_SIZE: usize = 1024;

struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Represents different types of content encoding.
enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Zstd(ZstdEncoder<'static, Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    fn gzip() -> Self {
        Self::Gzip(GzEncoder::new(Writer::new(), Compression::best()))
    }

    fn deflate() -> Self {
        Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::best()))
    }

    fn zstd() -> io::Result<Self> {
        Ok(Self::Zstd(ZstdEncoder::new(Writer::new(), 6)?))
    }

    fn br() -> Self {
        Self::Br(Box::new(brotli::CompressorWriter::new(
            Writer::new(),
            32 * 1024, // 32 KiB buffer
            3,         // BROTLI_PARAM_QUALITY
            22,        // BROTLI_PARAM_LGWIN
        )))
    }

    /// Selects an encoder based on the `Accept-Encoding` header, preferring zstd, br, gzip then deflate.
    fn select(accept_encodings: &str) -> io::Result<Option<Self>> {
        let accepted = |name: &str| {
            accept_encodings.split(',').any(|item| {
                let mut parts = item.split(';');
                let coding = parts.next().unwrap_or_default().trim();
                let rejected = parts.any(|param| match param.split_once('=') {
                    Some((key, value)) => {
                        key.trim().eq_ignore_ascii_case("q") && value.trim().parse::<f32>().is_ok_and(|q| q <= 0.0)
                    }
                    None => false,
                });
                coding.eq_ignore_ascii_case(name) && !rejected
            })
        };

        if accepted("zstd") {
            Self::zstd().map(Some)
        } else if accepted("br") {
            Ok(Some(Self::br()))
        } else if accepted("gzip") {
            Ok(Some(Self::gzip()))
        } else if accepted("deflate") {
            Ok(Some(Self::deflate()))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Encoder::Gzip(_) => "gzip",
            Encoder::Deflate(_) => "deflate",
            Encoder::Zstd(_) => "zstd",
            Encoder::Br(_) => "br",
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let name = self.name();
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!("Error encoding {} encoding: {}", name, e);
        }
        result
    }

    /// Pushes everything written so far out of the encoder, so a partial stream decodes.
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(encoder) => encoder.flush(),
            Self::Deflate(encoder) => encoder.flush(),
            Self::Zstd(encoder) => encoder.flush(),
            Self::Br(encoder) => encoder.flush(),
        }
    }

    /// Takes the encoded data produced so far.
    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    /// Finishes the encoding process and returns the remaining encoded data.
    fn finish(self) -> io::Result<Bytes> {
        let writer = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Br(mut encoder) => {
                encoder.flush()?;
                encoder.into_inner()
            }
        };
        Ok(writer.buf.freeze())
    }

    fn encode_all(mut self, data: &[u8]) -> io::Result<Bytes> {
        self.write(data)?;
        let mut encoded = BytesMut::from(self.take().as_ref());
        encoded.extend_from_slice(&self.finish()?);
        Ok(encoded.freeze())
    }
}

pin_project! {
    /// A wrapper around a byte stream that encodes the data.
    struct EncodedStream<S> {
        #[pin]
        inner: S,
        encoder: Option<Encoder>,
    }
}

impl<S> Stream for EncodedStream<S>
where
    S: Stream<Item = Result<Bytes, BoxError>>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            return match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(data)) => {
                    if let Err(e) = encoder.write(&data).and_then(|()| encoder.flush()) {
                        return Poll::Ready(Some(Err(e.into())));
                    }
                    let bytes = encoder.take();
                    if bytes.is_empty() {
                        continue;
                    }
                    Poll::Ready(Some(Ok(bytes)))
                }
                Some(Err(e)) => Poll::Ready(Some(Err(e))),
                None => match this.encoder.take().map(Encoder::finish) {
                    Some(Ok(bytes)) if !bytes.is_empty() => Poll::Ready(Some(Ok(bytes))),
                    Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                    _ => Poll::Ready(None),
                },
            };
        }
    }
}

/// Compresses reply bodies according to the request's `accept-encoding`.
///
/// Text, binary and json bodies are compressed when they are at least 1 KiB, stream
/// bodies always. Empty and delegate replies, and replies that already carry a
/// `content-encoding`, pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compress;

pub fn compress() -> Compress {
    Compress
}

#[async_trait]
impl Middleware for Compress {
    async fn call(&self, ctx: &RequestContext, next: Next) -> Result<Reply, Error> {
        let accept_encoding = ctx.headers().get(ACCEPT_ENCODING).and_then(|value| value.to_str().ok()).map(str::to_string);
        let reply = next.run().await?;

        let Some(accept_encoding) = accept_encoding else {
            return Ok(reply);
        };
        if reply.headers().contains_key(CONTENT_ENCODING)
            || matches!(reply.status(), StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
        {
            return Ok(reply);
        }

        let (bytes, default_type) = match reply.body() {
            ReplyBody::Text(text) => (Bytes::copy_from_slice(text.as_bytes()), TEXT_UTF_8),
            ReplyBody::Binary(bytes) => (Bytes::clone(bytes), OCTET_STREAM),
            ReplyBody::Json(value) => (Bytes::from(serde_json::to_vec(value)?), JSON_UTF_8),
            ReplyBody::Stream(stream) => {
                let Some(encoder) = Encoder::select(&accept_encoding)? else {
                    return Ok(reply);
                };
                let Some(inner) = stream.take() else {
                    return Ok(reply);
                };
                let headers = encoded_headers(&reply, encoder.name(), None);
                let encoded = EncodedStream { inner, encoder: Some(encoder) };
                return Ok(Reply::stream(encoded).set_status_code(reply.status()).set_headers(headers));
            }
            ReplyBody::Empty | ReplyBody::Delegate(_) => return Ok(reply),
        };

        if bytes.len() < MIN_COMPRESS_SIZE {
            return Ok(reply);
        }
        let Some(encoder) = Encoder::select(&accept_encoding)? else {
            return Ok(reply);
        };

        let name = encoder.name();
        let encoded = encoder.encode_all(&bytes)?;
        trace!(encoding = name, from = bytes.len(), to = encoded.len(), "compressed reply body");

        let headers = encoded_headers(&reply, name, Some(default_type));
        Ok(reply.set_body(encoded).set_headers(headers))
    }
}

fn encoded_headers(reply: &Reply, encoding: &'static str, default_type: Option<&'static str>) -> http::HeaderMap {
    let mut headers = reply.headers().clone();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
    headers.append(VARY, HeaderValue::from_static("accept-encoding"));
    if let Some(default_type) = default_type {
        headers.entry(CONTENT_TYPE).or_insert(HeaderValue::from_static(default_type));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::compress;
    use crate::context::tests::context;
    use crate::handler::{handler, RequestHandler};
    use crate::middleware::{compose, Middleware, Pipeline};
    use crate::reply::{Reply, ReplyBody};
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use http::header::{CONTENT_ENCODING, CONTENT_TYPE, VARY};
    use http::Request;
    use http_body_util::BodyExt;
    use futures::SinkExt;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline(body: &'static str) -> Pipeline {
        compose(vec![Arc::new(compress()) as Arc<dyn Middleware>], handler((), move || async move { body.repeat(200) }))
    }

    fn accepting(encoding: &'static str) -> crate::context::RequestContext {
        context(Request::builder().uri("/").header("accept-encoding", encoding).body("").unwrap())
    }

    fn gunzip(bytes: &[u8]) -> String {
        let mut decoded = String::new();
        GzDecoder::new(bytes).read_to_string(&mut decoded).unwrap();
        decoded
    }

    #[tokio::test]
    async fn test_gzip_large_text() {
        let ctx = accepting("gzip, deflate");
        let reply = pipeline("hello ").invoke(&ctx).await.unwrap();

        assert_eq!(reply.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(reply.headers()[VARY], "accept-encoding");
        assert_eq!(reply.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        let ReplyBody::Binary(bytes) = reply.body() else { panic!("expected a binary body") };
        assert_eq!(gunzip(bytes), "hello ".repeat(200));
    }

    #[tokio::test]
    async fn test_preference_order() {
        let reply = pipeline("hello ").invoke(&accepting("gzip, br, zstd")).await.unwrap();
        assert_eq!(reply.headers()[CONTENT_ENCODING], "zstd");

        for rejecting_zstd in ["gzip, zstd;q=0", "gzip, zstd;q=0.0", "gzip, zstd; Q = 0.000", "gzip;q=0.5, zstd;q=0"] {
            let reply = pipeline("hello ").invoke(&accepting(rejecting_zstd)).await.unwrap();
            assert_eq!(reply.headers()[CONTENT_ENCODING], "gzip", "{rejecting_zstd}");
        }

        let reply = pipeline("hello ").invoke(&accepting("gzip, zstd;q=0.1")).await.unwrap();
        assert_eq!(reply.headers()[CONTENT_ENCODING], "zstd");
    }

    #[tokio::test]
    async fn test_small_or_unaccepted_passes_through() {
        let small = compose(vec![Arc::new(compress()) as Arc<dyn Middleware>], handler((), || async { "tiny" }));
        let reply = small.invoke(&accepting("gzip")).await.unwrap();
        assert!(reply.headers().get(CONTENT_ENCODING).is_none());

        let reply = pipeline("hello ").invoke(&accepting("identity")).await.unwrap();
        assert!(reply.headers().get(CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_gzip_stream() {
        let streaming = compose(
            vec![Arc::new(compress()) as Arc<dyn Middleware>],
            handler((), || async {
                let chunks = vec![Ok::<_, std::io::Error>(Bytes::from("abc")), Ok(Bytes::from("def"))];
                Reply::stream(futures::stream::iter(chunks))
            }),
        );

        let ctx = accepting("gzip");
        let reply = streaming.invoke(&ctx).await.unwrap();
        assert_eq!(reply.headers()[CONTENT_ENCODING], "gzip");

        let response = reply.into_response(&ctx).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(gunzip(&bytes), "abcdef");
    }

    #[tokio::test]
    async fn test_stream_chunks_are_flushed() {
        let (mut sender, receiver) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
        let reply = Reply::stream(receiver);
        let streaming = compose(
            vec![Arc::new(compress()) as Arc<dyn Middleware>],
            handler((), move || {
                let reply = reply.clone();
                async move { reply }
            }),
        );

        let ctx = accepting("gzip");
        let reply = streaming.invoke(&ctx).await.unwrap();
        let mut body = reply.into_response(&ctx).await.unwrap().into_body();

        sender.send(Ok(Bytes::from("first chunk\n"))).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame()).await.unwrap().unwrap().unwrap();
        let data = frame.into_data().unwrap();

        // the sender is still open, so the gzip trailer has not been written yet
        let mut decoder = flate2::write::GzDecoder::new(Vec::new());
        decoder.write_all(&data).unwrap();
        decoder.flush().unwrap();
        assert_eq!(decoder.get_ref().as_slice(), b"first chunk\n");
        drop(sender);
    }
}
