//! Shared cryptography utilities
//!
//! This crate provides the signing identities and the CMS (PKCS#7)
//! SignedData encoding used to embed detached signatures in PDFs.

pub mod cms;
pub mod error;
pub mod keys;

pub use cms::{build_signed_data, parse_signed_data, ParsedSignedData};
pub use error::CryptoError;
pub use keys::{sha256, sha256_hex, verify_with_public_key, EphemeralIdentity, SigningIdentity};
