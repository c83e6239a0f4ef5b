use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppendError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Invalid trailer: {0}")]
    InvalidTrailer(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid page tree: {0}")]
    InvalidPageTree(String),

    #[error("Page {page} out of range (1-{count})")]
    PageOutOfRange { page: usize, count: usize },

    #[error("Object {0} {1} R not found")]
    ObjectNotFound(u32, u16),

    #[error("Object {0} {1} R belongs to the read-only baseline")]
    ReadOnlyObject(u32, u16),

    #[error("Unsupported document: {0}")]
    Unsupported(String),

    #[error("Signature field has no signature value")]
    MissingSignature,

    #[error("Signer failed: {0}")]
    SignerError(String),

    #[error("Signature too large: {needed} bytes (reserved {reserved})")]
    SignatureTooLarge { needed: usize, reserved: usize },

    #[error("ByteRange does not fit its placeholder: {0}")]
    ByteRangeOverflow(String),

    #[error("Invalid signing state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Appender has already been written")]
    AlreadyWritten,

    #[error("Signature validation failed: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppendError>;
