//! Digital signatures
//!
//! A [`SignatureHandler`] supplies the cryptography: how much space to
//! reserve, which digest to run over the signed byte ranges, and how to turn
//! that digest into the bytes stored in `Contents`. Everything PDF-specific
//! (placeholders, byte ranges, patching) lives in [`orchestrator`].

pub mod field;
pub mod orchestrator;
pub mod pkcs7;
pub mod validate;

use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Object, StringFormat};
use sha2::digest::DynDigest;

use crate::error::Result;

pub use field::SignatureField;
pub use orchestrator::{SigningSession, SigningState};
pub use pkcs7::Pkcs7Handler;
pub use validate::{validate_signatures, SignatureReport};

/// Largest value a `ByteRange` placeholder entry can be patched to
pub const BYTE_RANGE_PLACEHOLDER: i64 = 9_999_999_999;

/// Values written into the signature dictionary
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub filter: String,
    pub sub_filter: String,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub signing_time: DateTime<Utc>,
    /// Bytes reserved for the encoded signature in `Contents`
    pub reserved: usize,
}

impl Default for SignatureInfo {
    fn default() -> Self {
        Self {
            filter: "Adobe.PPKLite".to_string(),
            sub_filter: String::new(),
            name: None,
            reason: None,
            location: None,
            contact_info: None,
            signing_time: Utc::now(),
            reserved: 0,
        }
    }
}

/// Produces and checks signature values
pub trait SignatureHandler {
    /// Fill in filter, sub-filter and the reserved size
    fn init_signature(&self, info: &mut SignatureInfo);

    /// Upper bound on the encoded signature length in bytes
    fn signature_size(&self) -> usize;

    /// Fresh digest accumulator for the signed byte ranges
    fn new_digest(&self) -> Box<dyn DynDigest>;

    /// Encode a signature over a finished digest
    fn sign(&self, info: &SignatureInfo, digest: &[u8]) -> Result<Vec<u8>>;

    /// Whether this handler understands a `SubFilter` value
    fn is_applicable(&self, sub_filter: &[u8]) -> bool;

    /// Check stored `Contents` bytes against a recomputed digest
    fn validate(&self, contents: &[u8], digest: &[u8]) -> Result<bool>;
}

/// A signature waiting to be placed into the next revision
pub struct PdfSignature {
    handler: Box<dyn SignatureHandler>,
    info: SignatureInfo,
}

impl PdfSignature {
    pub fn new(handler: impl SignatureHandler + 'static) -> Self {
        let mut info = SignatureInfo::default();
        handler.init_signature(&mut info);
        Self {
            handler: Box::new(handler),
            info,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = Some(name.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.info.reason = Some(reason.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.info.location = Some(location.into());
        self
    }

    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.info.contact_info = Some(contact.into());
        self
    }

    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.info.signing_time = time;
        self
    }

    pub fn info(&self) -> &SignatureInfo {
        &self.info
    }

    pub fn handler(&self) -> &dyn SignatureHandler {
        self.handler.as_ref()
    }

    /// Signature dictionary with placeholder `Contents` and `ByteRange`
    pub fn dictionary(&self) -> Dictionary {
        let info = &self.info;
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"Sig".to_vec()));
        dict.set("Filter", Object::Name(info.filter.as_bytes().to_vec()));
        dict.set("SubFilter", Object::Name(info.sub_filter.as_bytes().to_vec()));

        for (key, value) in [
            ("Name", &info.name),
            ("Reason", &info.reason),
            ("Location", &info.location),
            ("ContactInfo", &info.contact_info),
        ] {
            if let Some(value) = value {
                dict.set(key, text_string(value));
            }
        }

        dict.set(
            "M",
            Object::String(pdf_date(&info.signing_time).into_bytes(), StringFormat::Literal),
        );
        dict.set(
            "Contents",
            Object::String(vec![0; info.reserved], StringFormat::Hexadecimal),
        );
        dict.set("ByteRange", byte_range_placeholder(1));
        dict
    }
}

/// `[0 9999999999 ...]` with room for `signatures + 1` covered ranges
pub fn byte_range_placeholder(signatures: usize) -> Object {
    let mut entries = vec![Object::Integer(0)];
    entries.extend((1..2 * (signatures + 1)).map(|_| Object::Integer(BYTE_RANGE_PLACEHOLDER)));
    Object::Array(entries)
}

/// Render `(offset, length)` pairs as a PDF integer array
pub fn render_byte_range(ranges: &[(usize, usize)]) -> String {
    let values: Vec<String> = ranges
        .iter()
        .flat_map(|(offset, length)| [offset.to_string(), length.to_string()])
        .collect();
    format!("[{}]", values.join(" "))
}

/// PDF date string, `D:YYYYMMDDHHmmSS+00'00'`
pub fn pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Literal string, or UTF-16BE with BOM when the text is not ASCII
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}
