use thiserror::Error;

/// The source document could not be turned into table markup.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("reading document: {0}")]
    Io(#[from] std::io::Error),
    #[error("opening document package: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("malformed document XML in {part}: {message}")]
    Xml { part: String, message: String },
    #[error("document package has no {0}")]
    MissingPart(&'static str),
    #[error("unsupported document format: {0}")]
    Unsupported(String),
}

/// A single embedded image failed to reach the asset store.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("asset store rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("asset store response had no secure_url")]
    MissingUrl,
    #[error("embedded image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("asset store is not configured: {0}")]
    NotConfigured(&'static str),
}

impl AssetError {
    /// Transport failures, rate limiting and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            AssetError::Http(e) => !e.is_builder() && !e.is_decode(),
            AssetError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("image upload failed for row {row}: {source}")]
    AssetUpload {
        row: usize,
        #[source]
        source: AssetError,
    },
    #[error("invalid event context: {0}")]
    InvalidContext(String),
}
