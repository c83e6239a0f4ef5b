//! Signature verification over a finished file

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::warn;

use super::SignatureHandler;
use crate::error::{AppendError, Result};
use crate::pages::catalog_id;

/// Outcome for one signature field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReport {
    pub field: String,
    pub sub_filter: String,
    pub byte_range: Vec<(usize, usize)>,
    /// The signed ranges reach the end of the file
    pub covers_document: bool,
    /// A handler accepted the signature
    pub valid: bool,
}

/// Check every signature field in `bytes`
///
/// The first handler that accepts a field's `SubFilter` decides; fields no
/// handler understands are reported as invalid.
pub fn validate_signatures(
    bytes: &[u8],
    handlers: &[&dyn SignatureHandler],
) -> Result<Vec<SignatureReport>> {
    let doc = Document::load_mem(bytes).map_err(|e| AppendError::ParseError(e.to_string()))?;

    signature_fields(&doc)?
        .into_iter()
        .map(|(name, signature)| check_signature(bytes, &name, signature, handlers))
        .collect()
}

/// `(field name, signature dictionary)` for every filled signature field
fn signature_fields(doc: &Document) -> Result<Vec<(String, &Dictionary)>> {
    let catalog = doc
        .get_object(catalog_id(doc)?)
        .and_then(Object::as_dict)
        .map_err(|_| AppendError::InvalidCatalog("catalog is not a dictionary".into()))?;

    let Some(acroform) = catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok())
    else {
        return Ok(Vec::new());
    };
    let Some(fields) = acroform
        .get(b"Fields")
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_array().ok())
    else {
        return Ok(Vec::new());
    };

    // (field reference, inherited FT, parent name)
    let mut stack: Vec<(&Object, bool, String)> = fields
        .iter()
        .rev()
        .map(|field| (field, false, String::new()))
        .collect();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut found = Vec::new();

    while let Some((object, inherited_sig, parent_name)) = stack.pop() {
        if let Object::Reference(id) = object {
            if !visited.insert(*id) {
                continue;
            }
        }
        let Some(field) = resolve(doc, object).and_then(|o| o.as_dict().ok()) else {
            continue;
        };

        let is_sig = match field.get(b"FT").and_then(Object::as_name) {
            Ok(ft) => ft == b"Sig",
            Err(_) => inherited_sig,
        };
        let name = match field.get(b"T") {
            Ok(Object::String(partial, _)) => {
                let partial = String::from_utf8_lossy(partial);
                if parent_name.is_empty() {
                    partial.into_owned()
                } else {
                    format!("{}.{}", parent_name, partial)
                }
            }
            _ => parent_name.clone(),
        };

        if let Ok(kids) = field.get(b"Kids").and_then(Object::as_array) {
            for kid in kids.iter().rev() {
                stack.push((kid, is_sig, name.clone()));
            }
        }

        if !is_sig {
            continue;
        }
        let signature = field
            .get(b"V")
            .ok()
            .and_then(|value| resolve(doc, value))
            .and_then(|value| value.as_dict().ok());
        if let Some(signature) = signature {
            found.push((name, signature));
        }
    }

    Ok(found)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.objects.get(id),
        direct => Some(direct),
    }
}

fn check_signature(
    bytes: &[u8],
    name: &str,
    signature: &Dictionary,
    handlers: &[&dyn SignatureHandler],
) -> Result<SignatureReport> {
    let sub_filter = signature
        .get(b"SubFilter")
        .and_then(Object::as_name)
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default();
    let byte_range = parse_byte_range(signature, bytes.len())?;
    let contents = match signature.get(b"Contents") {
        Ok(Object::String(contents, _)) => contents.as_slice(),
        _ => {
            return Err(AppendError::ValidationError(format!(
                "signature {} has no Contents",
                name
            )))
        }
    };

    let covers_document = byte_range
        .last()
        .map(|(offset, length)| offset + length == bytes.len())
        .unwrap_or(false)
        && byte_range.first().map(|(offset, _)| *offset) == Some(0);

    let valid = match handlers
        .iter()
        .find(|handler| handler.is_applicable(sub_filter.as_bytes()))
    {
        Some(handler) => {
            let mut digest = handler.new_digest();
            for (offset, length) in &byte_range {
                digest.update(&bytes[*offset..offset + length]);
            }
            handler.validate(contents, &digest.finalize())?
        }
        None => {
            warn!(field = name, sub_filter = %sub_filter, "no handler for signature");
            false
        }
    };

    Ok(SignatureReport {
        field: name.to_string(),
        sub_filter,
        byte_range,
        covers_document,
        valid,
    })
}

/// `ByteRange` as `(offset, length)` pairs, bounds-checked against the file
fn parse_byte_range(signature: &Dictionary, len: usize) -> Result<Vec<(usize, usize)>> {
    let values = signature
        .get(b"ByteRange")
        .and_then(Object::as_array)
        .map_err(|_| AppendError::ValidationError("ByteRange is missing".into()))?;
    if values.len() % 2 != 0 {
        return Err(AppendError::ValidationError(
            "ByteRange has an odd number of entries".into(),
        ));
    }

    let mut ranges = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks_exact(2) {
        let (Ok(offset), Ok(length)) = (pair[0].as_i64(), pair[1].as_i64()) else {
            return Err(AppendError::ValidationError(
                "ByteRange entries must be integers".into(),
            ));
        };
        let (Ok(offset), Ok(length)) = (usize::try_from(offset), usize::try_from(length)) else {
            return Err(AppendError::ValidationError("negative ByteRange entry".into()));
        };
        if offset.checked_add(length).map_or(true, |end| end > len) {
            return Err(AppendError::ValidationError(format!(
                "ByteRange {}+{} exceeds file length {}",
                offset, length, len
            )));
        }
        ranges.push((offset, length));
    }
    Ok(ranges)
}
