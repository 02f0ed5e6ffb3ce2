use crate::context::{CacheKey, RequestContext};
use crate::error::Error;
use crate::limit::ByteLimit;
use crate::selector::Selector;
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http_body_util::BodyDataStream;
use multer::{Constraints, Multipart, SizeLimit};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

static MULTIPART: Lazy<CacheKey<MultipartBody>> = Lazy::new(CacheKey::new);

const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Where uploaded files go and how large the parts may be.
#[derive(Debug, Clone)]
pub struct MultipartOptions {
    pub upload_dir: PathBuf,
    pub field_size_limit: Option<ByteLimit>,
    pub file_size_limit: Option<ByteLimit>,
    pub total_size_limit: Option<ByteLimit>,
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self { upload_dir: std::env::temp_dir(), field_size_limit: None, file_size_limit: None, total_size_limit: None }
    }
}

impl MultipartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = upload_dir.into();
        self
    }

    pub fn field_size_limit(mut self, limit: ByteLimit) -> Self {
        self.field_size_limit = Some(limit);
        self
    }

    pub fn file_size_limit(mut self, limit: ByteLimit) -> Self {
        self.file_size_limit = Some(limit);
        self
    }

    pub fn total_size_limit(mut self, limit: ByteLimit) -> Self {
        self.total_size_limit = Some(limit);
        self
    }
}

/// A file part streamed to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub size: u64,
}

impl UploadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The text fields and the uploaded files of a `multipart/form-data` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    fields: Vec<(String, String)>,
    files: Vec<UploadedFile>,
}

impl MultipartBody {
    /// The first text value of `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// The first file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|file| file.field_name == name)
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }
}

/// Parses a `multipart/form-data` body, once per request.
///
/// The options of the first multipart selector reached in a request apply.
#[derive(Debug, Clone, Default)]
pub struct MultipartSelector {
    options: MultipartOptions,
}

pub fn multipart_body(options: MultipartOptions) -> MultipartSelector {
    MultipartSelector { options }
}

#[async_trait]
impl Selector for MultipartSelector {
    type Output = Arc<MultipartBody>;

    async fn select(&self, ctx: &RequestContext) -> Result<Self::Output, Error> {
        ctx.get_or_compute(&*MULTIPART, || parse(ctx, &self.options)).await
    }
}

async fn parse(ctx: &RequestContext, options: &MultipartOptions) -> Result<MultipartBody, Error> {
    let content_type = ctx.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or("none");
    if !content_type.trim_start().to_ascii_lowercase().starts_with(MULTIPART_FORM_DATA) {
        return Err(Error::unsupported_media_type(MULTIPART_FORM_DATA, content_type));
    }
    let boundary = multer::parse_boundary(content_type)?;

    let Some(body) = ctx.take_body().await? else {
        return Err(Error::invalid_body("request body has already been consumed"));
    };

    let mut size_limit = SizeLimit::new();
    if let Some(limit) = &options.total_size_limit {
        size_limit = size_limit.whole_stream(limit.bytes());
    }
    if let Some(limit) = &options.field_size_limit {
        size_limit = size_limit.per_field(limit.bytes());
    }
    let constraints = Constraints::new().size_limit(size_limit);
    let mut multipart = Multipart::with_constraints(BodyDataStream::new(body), boundary, constraints);

    let mut parsed = MultipartBody::default();
    let result = read_parts(&mut multipart, options, &mut parsed).await;

    if let Err(e) = result {
        remove_files(&parsed.files).await;
        return Err(e);
    }
    Ok(parsed)
}

async fn read_parts(
    multipart: &mut Multipart<'static>,
    options: &MultipartOptions,
    parsed: &mut MultipartBody,
) -> Result<(), Error> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| size_error(e, options))? {
        let field_name = field.name().unwrap_or_default().to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(|e| size_error(e, options))?;
            parsed.fields.push((field_name, value));
            continue;
        };

        let content_type = field.content_type().map(ToString::to_string);
        let path = options.upload_dir.join(uuid::Uuid::new_v4().to_string());
        let mut file = File::create(&path).await?;

        let mut upload = UploadedFile { field_name, file_name, content_type, path, size: 0 };
        let written = loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break Ok(()),
                Err(e) => break Err(size_error(e, options)),
            };

            upload.size += chunk.len() as u64;
            if let Some(limit) = options.file_size_limit.as_ref().filter(|limit| limit.is_exceeded_by(upload.size)) {
                break Err(Error::payload_too_large(limit));
            }
            if let Err(e) = file.write_all(&chunk).await {
                break Err(e.into());
            }
        };

        let flushed = file.flush().await;
        // the partial file is removed together with the others on failure
        parsed.files.push(upload);
        written?;
        flushed?;
    }
    Ok(())
}

fn size_error(e: multer::Error, options: &MultipartOptions) -> Error {
    let limit = match &e {
        multer::Error::StreamSizeExceeded { .. } => options.total_size_limit.as_ref(),
        multer::Error::FieldSizeExceeded { .. } => options.field_size_limit.as_ref(),
        _ => None,
    };
    match limit {
        Some(limit) => Error::payload_too_large(limit),
        None => Error::from(e),
    }
}

async fn remove_files(files: &[UploadedFile]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            warn!(path = %file.path.display(), cause = %e, "failed to remove uploaded file");
        } else {
            debug!(path = %file.path.display(), "removed uploaded file");
        }
    }
}

/// Removes the files of an upload, the handler decides when it is done with them.
pub async fn remove_uploads(body: &MultipartBody) {
    remove_files(&body.files).await;
}

#[cfg(test)]
mod tests {
    use super::{multipart_body, remove_uploads, MultipartOptions};
    use crate::context::tests::context;
    use crate::error::Error;
    use crate::limit::ByteLimit;
    use crate::selector::Selector;
    use http::{Method, Request, StatusCode};

    const BODY: &str = "--XYZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\
        \r\n\
        hello\r\n\
        --XYZ\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        file content\r\n\
        --XYZ--\r\n";

    fn upload(content_type: &str) -> crate::context::RequestContext {
        context(Request::builder().method(Method::POST).uri("/").header("content-type", content_type).body(BODY).unwrap())
    }

    #[tokio::test]
    async fn test_fields_and_files() {
        let ctx = upload("multipart/form-data; boundary=XYZ");
        let body = multipart_body(MultipartOptions::new()).select(&ctx).await.unwrap();

        assert_eq!(body.field("title"), Some("hello"));
        let file = body.file("upload").unwrap();
        assert_eq!(file.file_name, "a.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.size, 12);
        assert_eq!(tokio::fs::read_to_string(file.path()).await.unwrap(), "file content");

        // cached for the rest of the request
        let again = multipart_body(MultipartOptions::new()).select(&ctx).await.unwrap();
        assert_eq!(again.files(), body.files());

        remove_uploads(&body).await;
        assert!(!file.path().exists());
    }

    #[tokio::test]
    async fn test_file_size_limit() {
        let ctx = upload("multipart/form-data; boundary=XYZ");
        let options = MultipartOptions::new().file_size_limit("4b".parse().unwrap());

        let err = multipart_body(options).select(&ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(err.to_string().contains("4b"));
    }

    #[tokio::test]
    async fn test_total_size_limit() {
        let ctx = upload("multipart/form-data; boundary=XYZ");
        let options = MultipartOptions::new().total_size_limit(ByteLimit::from_bytes(16));

        let err = multipart_body(options).select(&ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_not_multipart() {
        let ctx = upload("application/json");
        let err = multipart_body(MultipartOptions::new()).select(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType { .. }));
    }
}
