pub type OvertypeResult<T> = Result<T, OvertypeError>;

#[derive(thiserror::Error, Debug)]
pub enum OvertypeError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("address {address} out of range for document with {count} text layers")]
    AddressOutOfRange { address: usize, count: usize },

    #[error("layer at address {0} is not a text layer")]
    NotATextLayer(usize),

    #[error("document changed: expected digest {expected}, got {actual}")]
    DocumentChanged { expected: String, actual: String },

    #[error("compositing failed: {0}")]
    CompositingFailed(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OvertypeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }

    pub fn compositing(msg: impl Into<String>) -> Self {
        Self::CompositingFailed(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable kind string used in wire-format error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDocument(_) => "malformed_document",
            Self::AddressOutOfRange { .. } => "address_out_of_range",
            Self::NotATextLayer(_) => "not_a_text_layer",
            Self::DocumentChanged { .. } => "document_changed",
            Self::CompositingFailed(_) => "compositing_failed",
            Self::EncodingFailed(_) => "encoding_failed",
            Self::Validation(_) => "validation",
            Self::Other(_) => "internal",
        }
    }
}
