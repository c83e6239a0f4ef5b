//! Object serialization
//!
//! Writes lopdf objects in a canonical textual form. The same function is
//! used for change detection (serialized-form equality) and for emitting the
//! revision, so two equal objects always produce identical bytes.
//!
//! [`write_indirect`] can additionally report where the values of selected
//! top-level dictionary keys landed in the output buffer. Signature
//! dictionaries use this to locate their `Contents` and `ByteRange` fields
//! without searching the output.

use std::ops::Range;

use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};

/// Where the value of a tracked dictionary key was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSpan {
    pub key: Vec<u8>,
    pub range: Range<usize>,
}

/// Serialize a direct object into a fresh buffer
pub fn object_bytes(object: &Object) -> Vec<u8> {
    let mut buf = Vec::new();
    write_object(&mut buf, object);
    buf
}

/// Serialize `N G obj ... endobj`, reporting spans for `tracked` keys
///
/// Spans are offsets into `buf` (not relative to the object start).
pub fn write_indirect(
    buf: &mut Vec<u8>,
    id: ObjectId,
    object: &Object,
    tracked: &[&[u8]],
) -> Vec<ValueSpan> {
    let mut spans = Vec::new();

    buf.extend_from_slice(format!("{} {} obj\n", id.0, id.1).as_bytes());
    match object {
        Object::Dictionary(dict) => write_dictionary(buf, dict, tracked, &mut spans),
        Object::Stream(stream) => write_stream(buf, stream, tracked, &mut spans),
        other => write_object(buf, other),
    }
    buf.extend_from_slice(b"\nendobj\n");

    spans
}

/// Serialize a direct object
pub fn write_object(buf: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => buf.extend_from_slice(b"null"),
        Object::Boolean(value) => {
            buf.extend_from_slice(if *value { b"true" } else { b"false" })
        }
        Object::Integer(value) => buf.extend_from_slice(value.to_string().as_bytes()),
        Object::Real(value) => write_real(buf, *value),
        Object::Name(name) => write_name(buf, name),
        Object::String(bytes, StringFormat::Literal) => write_literal_string(buf, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            buf.push(b'<');
            buf.extend_from_slice(hex::encode(bytes).as_bytes());
            buf.push(b'>');
        }
        Object::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_object(buf, item);
            }
            buf.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(buf, dict, &[], &mut Vec::new()),
        Object::Stream(stream) => write_stream(buf, stream, &[], &mut Vec::new()),
        Object::Reference(id) => {
            buf.extend_from_slice(format!("{} {} R", id.0, id.1).as_bytes());
        }
    }
}

fn write_dictionary(
    buf: &mut Vec<u8>,
    dict: &Dictionary,
    tracked: &[&[u8]],
    spans: &mut Vec<ValueSpan>,
) {
    buf.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        write_entry(buf, key, value, tracked, spans);
    }
    buf.extend_from_slice(b">>");
}

fn write_entry(
    buf: &mut Vec<u8>,
    key: &[u8],
    value: &Object,
    tracked: &[&[u8]],
    spans: &mut Vec<ValueSpan>,
) {
    write_name(buf, key);
    buf.push(b' ');
    let start = buf.len();
    write_object(buf, value);
    if tracked.contains(&key) {
        spans.push(ValueSpan {
            key: key.to_vec(),
            range: start..buf.len(),
        });
    }
}

/// Streams always carry a direct `Length` equal to the payload size, so an
/// indirect length object in the source never leaks into the comparison.
fn write_stream(buf: &mut Vec<u8>, stream: &Stream, tracked: &[&[u8]], spans: &mut Vec<ValueSpan>) {
    buf.extend_from_slice(b"<<");
    for (key, value) in stream.dict.iter() {
        if key.as_slice() == b"Length" {
            continue;
        }
        write_entry(buf, key, value, tracked, spans);
    }
    buf.extend_from_slice(format!("/Length {}>>", stream.content.len()).as_bytes());
    buf.extend_from_slice(b"\nstream\n");
    buf.extend_from_slice(&stream.content);
    buf.extend_from_slice(b"\nendstream");
}

fn write_real(buf: &mut Vec<u8>, value: f32) {
    if !value.is_finite() {
        buf.push(b'0');
        return;
    }
    let mut text = format!("{:.5}", value);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    buf.extend_from_slice(text.as_bytes());
}

fn write_name(buf: &mut Vec<u8>, name: &[u8]) {
    buf.push(b'/');
    for &b in name {
        if is_regular_name_byte(b) {
            buf.push(b);
        } else {
            buf.extend_from_slice(format!("#{:02X}", b).as_bytes());
        }
    }
}

fn is_regular_name_byte(b: u8) -> bool {
    (b'!'..=b'~').contains(&b) && !b"()<>[]{}/%#".contains(&b)
}

fn write_literal_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                buf.push(b'\\');
                buf.push(b);
            }
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            _ => buf.push(b),
        }
    }
    buf.push(b')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(object: &Object) -> String {
        String::from_utf8(object_bytes(object)).unwrap()
    }

    #[test]
    fn test_primitives() {
        assert_eq!(text(&Object::Null), "null");
        assert_eq!(text(&Object::Boolean(true)), "true");
        assert_eq!(text(&Object::Integer(-42)), "-42");
        assert_eq!(text(&Object::Reference((12, 0))), "12 0 R");
    }

    #[test]
    fn test_reals_are_trimmed() {
        assert_eq!(text(&Object::Real(612.0)), "612");
        assert_eq!(text(&Object::Real(0.5)), "0.5");
        assert_eq!(text(&Object::Real(-0.0)), "0");
        assert_eq!(text(&Object::Real(f32::NAN)), "0");
    }

    #[test]
    fn test_names_escape_delimiters() {
        assert_eq!(text(&Object::Name(b"Type".to_vec())), "/Type");
        assert_eq!(text(&Object::Name(b"A B".to_vec())), "/A#20B");
        assert_eq!(text(&Object::Name(b"x/y".to_vec())), "/x#2Fy");
    }

    #[test]
    fn test_strings() {
        let literal = Object::String(b"a(b)\\c\n".to_vec(), StringFormat::Literal);
        assert_eq!(text(&literal), "(a\\(b\\)\\\\c\\n)");

        let hex = Object::String(vec![0xde, 0xad, 0x00], StringFormat::Hexadecimal);
        assert_eq!(text(&hex), "<dead00>");
    }

    #[test]
    fn test_dictionary_and_array() {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"Page".to_vec()));
        dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ]),
        );
        dict.set("Parent", Object::Reference((2, 0)));

        assert_eq!(
            text(&Object::Dictionary(dict)),
            "<</Type /Page/MediaBox [0 0 612 792]/Parent 2 0 R>>"
        );
    }

    #[test]
    fn test_stream_length_is_recomputed() {
        let mut dict = Dictionary::new();
        dict.set("Length", Object::Reference((9, 0)));
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        let stream = Stream::new(dict, b"abc".to_vec());

        assert_eq!(
            text(&Object::Stream(stream)),
            "<</Filter /FlateDecode/Length 3>>\nstream\nabc\nendstream"
        );
    }

    #[test]
    fn test_write_indirect_reports_tracked_spans() {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"Sig".to_vec()));
        dict.set(
            "Contents",
            Object::String(vec![0; 4], StringFormat::Hexadecimal),
        );
        dict.set(
            "ByteRange",
            Object::Array(vec![Object::Integer(0), Object::Integer(9999999999)]),
        );

        let mut buf = b"prefix".to_vec();
        let spans = write_indirect(
            &mut buf,
            (7, 0),
            &Object::Dictionary(dict),
            &[b"Contents", b"ByteRange"],
        );

        assert_eq!(spans.len(), 2);
        assert_eq!(&buf[spans[0].range.clone()], b"<00000000>");
        assert_eq!(&buf[spans[1].range.clone()], b"[0 9999999999]");
        assert!(buf.starts_with(b"prefix7 0 obj\n"));
        assert!(buf.ends_with(b"\nendobj\n"));
    }
}
