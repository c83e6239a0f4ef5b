use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Malformed DER: {0}")]
    MalformedDer(String),

    #[error("Missing CMS element: {0}")]
    MissingElement(&'static str),
}
