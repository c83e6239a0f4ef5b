//! Incremental PDF revisions
//!
//! This crate edits PDFs without rewriting them: changes are appended as a
//! new revision after the original bytes, which stay byte-for-byte intact.
//!
//! - [`Appender`]: load a document, edit pages and objects, write a revision
//! - [`SignatureField`] / [`PdfSignature`]: signatures filled in by a two-pass
//!   write that reserves, digests, signs and patches in place
//! - [`validate_signatures`]: recompute and check the signatures of a file

pub mod appender;
pub mod arena;
pub mod assemble;
pub mod collect;
pub mod config;
pub mod error;
pub mod import;
pub mod pages;
pub mod provenance;
pub mod revision;
pub mod serialize;
pub mod signature;

pub use appender::{Appender, WriteSummary};
pub use arena::{Arena, Handle};
pub use config::AppendOptions;
pub use error::{AppendError, Result};
pub use revision::XrefFormat;
pub use signature::{
    validate_signatures, Pkcs7Handler, PdfSignature, SignatureField, SignatureHandler,
    SignatureInfo, SignatureReport, SigningSession, SigningState,
};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<usize> {
    let doc =
        lopdf::Document::load_mem(bytes).map_err(|e| AppendError::ParseError(e.to_string()))?;
    Ok(pages::enumerate_pages(&doc)?.len())
}
