//! Incremental revision writer
//!
//! Serializes a set of numbered objects followed by a cross-reference
//! section and trailer that chain back to the previous revision through
//! `Prev`. All offsets are absolute, measured from the start of the original
//! file, so the revision can be appended without further adjustment.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::ops::Range;

use flate2::{write::ZlibEncoder, Compression};
use lopdf::{Dictionary, Object, ObjectId, Stream};
use tracing::{debug, warn};

use crate::error::{AppendError, Result};
use crate::serialize::{write_indirect, write_object};

/// Keys whose value positions are reported for tracked objects
pub const TRACKED_KEYS: [&[u8]; 2] = [b"Contents", b"ByteRange"];

/// Cross-reference flavor, mirrored from the original file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFormat {
    Table,
    Stream,
}

impl XrefFormat {
    /// Table if the bytes at `startxref` begin with the `xref` keyword
    pub fn detect(bytes: &[u8], startxref: usize) -> Self {
        let Some(tail) = bytes.get(startxref..) else {
            warn!(startxref, "startxref points past the end of the file");
            return XrefFormat::Table;
        };
        let start = tail
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(tail.len());
        if tail[start..].starts_with(b"xref") {
            XrefFormat::Table
        } else {
            XrefFormat::Stream
        }
    }
}

/// Offset recorded after the last `startxref` keyword
pub fn locate_startxref(bytes: &[u8]) -> Result<usize> {
    const KEYWORD: &[u8] = b"startxref";

    let position = bytes
        .windows(KEYWORD.len())
        .rposition(|window| window == KEYWORD)
        .ok_or_else(|| AppendError::InvalidTrailer("startxref not found".into()))?;

    let digits: String = bytes[position + KEYWORD.len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();

    digits
        .parse()
        .map_err(|_| AppendError::InvalidTrailer("startxref offset is not a number".into()))
}

/// Trailer entries carried into the new revision
#[derive(Debug, Clone)]
pub struct TrailerInfo {
    pub root: ObjectId,
    pub info: Option<ObjectId>,
    pub id: Option<Object>,
    /// Offset of the previous cross-reference section
    pub prev: usize,
    /// First object number not used by any revision, including this one
    pub size: u32,
}

/// Absolute position of a tracked dictionary value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSpan {
    pub object: ObjectId,
    pub key: Vec<u8>,
    pub range: Range<usize>,
}

/// The serialized revision and where everything in it landed
#[derive(Debug, Clone)]
pub struct RevisionLayout {
    /// Revision bytes, to be appended directly after the original file
    pub bytes: Vec<u8>,
    /// Length of the original file
    pub base: usize,
    pub offsets: BTreeMap<ObjectId, usize>,
    pub spans: Vec<TrackedSpan>,
    pub startxref: usize,
}

impl RevisionLayout {
    /// Length of original plus revision
    pub fn total_len(&self) -> usize {
        self.base + self.bytes.len()
    }

    pub fn span(&self, object: ObjectId, key: &[u8]) -> Option<Range<usize>> {
        self.spans
            .iter()
            .find(|span| span.object == object && span.key == key)
            .map(|span| span.range.clone())
    }

    /// Translate an absolute range into an index range of `bytes`
    pub fn local(&self, range: &Range<usize>) -> Range<usize> {
        range.start - self.base..range.end - self.base
    }
}

#[derive(Debug, Clone)]
pub struct RevisionWriter {
    format: XrefFormat,
    compress: bool,
}

impl RevisionWriter {
    pub fn new(format: XrefFormat, compress: bool) -> Self {
        Self { format, compress }
    }

    pub fn format(&self) -> XrefFormat {
        self.format
    }

    /// Serialize `objects` in order as a revision following `original`
    ///
    /// Objects listed in `tracked` report the spans of their `Contents` and
    /// `ByteRange` values.
    pub fn write(
        &self,
        original: &[u8],
        objects: &[(ObjectId, Object)],
        tracked: &BTreeSet<ObjectId>,
        trailer: &TrailerInfo,
    ) -> Result<RevisionLayout> {
        let base = original.len();
        let mut bytes = Vec::new();
        if !matches!(original.last(), Some(b'\n') | Some(b'\r')) {
            bytes.push(b'\n');
        }

        let mut offsets = BTreeMap::new();
        let mut spans = Vec::new();
        for (id, object) in objects {
            offsets.insert(*id, base + bytes.len());
            let keys: &[&[u8]] = if tracked.contains(id) {
                &TRACKED_KEYS
            } else {
                &[]
            };
            for span in write_indirect(&mut bytes, *id, object, keys) {
                spans.push(TrackedSpan {
                    object: *id,
                    key: span.key,
                    range: base + span.range.start..base + span.range.end,
                });
            }
        }

        let startxref = base + bytes.len();
        match self.format {
            XrefFormat::Table => write_xref_table(&mut bytes, &offsets, trailer, startxref),
            XrefFormat::Stream => {
                self.write_xref_stream(&mut bytes, &mut offsets, trailer, startxref)?
            }
        }

        debug!(
            objects = objects.len(),
            bytes = bytes.len(),
            format = ?self.format,
            "revision serialized"
        );

        Ok(RevisionLayout {
            bytes,
            base,
            offsets,
            spans,
            startxref,
        })
    }

    fn write_xref_stream(
        &self,
        bytes: &mut Vec<u8>,
        offsets: &mut BTreeMap<ObjectId, usize>,
        trailer: &TrailerInfo,
        startxref: usize,
    ) -> Result<()> {
        let own_id = (trailer.size, 0);
        offsets.insert(own_id, startxref);

        let offset_width = byte_width(offsets.values().copied().max().unwrap_or(0)).max(4);
        let mut data = Vec::with_capacity(offsets.len() * (offset_width + 3));
        for (id, offset) in offsets.iter() {
            data.push(1u8);
            data.extend_from_slice(&(*offset as u64).to_be_bytes()[8 - offset_width..]);
            data.extend_from_slice(&id.1.to_be_bytes());
        }

        let mut dict = trailer_dict(trailer, trailer.size + 1);
        dict.set("Type", Object::Name(b"XRef".to_vec()));
        dict.set(
            "Index",
            Object::Array(
                subsections(offsets.keys().map(|id| id.0))
                    .into_iter()
                    .flat_map(|(first, count)| {
                        [Object::Integer(first as i64), Object::Integer(count as i64)]
                    })
                    .collect(),
            ),
        );
        dict.set(
            "W",
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(offset_width as i64),
                Object::Integer(2),
            ]),
        );

        let content = if self.compress {
            dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?
        } else {
            data
        };

        write_indirect(bytes, own_id, &Object::Stream(Stream::new(dict, content)), &[]);
        bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());
        Ok(())
    }
}

fn write_xref_table(
    bytes: &mut Vec<u8>,
    offsets: &BTreeMap<ObjectId, usize>,
    trailer: &TrailerInfo,
    startxref: usize,
) {
    bytes.extend_from_slice(b"xref\n");
    let ids: Vec<&ObjectId> = offsets.keys().collect();
    let mut index = 0;
    for (first, count) in subsections(ids.iter().map(|id| id.0)) {
        bytes.extend_from_slice(format!("{} {}\n", first, count).as_bytes());
        for id in &ids[index..index + count as usize] {
            let offset = offsets[*id];
            bytes.extend_from_slice(format!("{:010} {:05} n\r\n", offset, id.1).as_bytes());
        }
        index += count as usize;
    }

    bytes.extend_from_slice(b"trailer\n");
    write_object(bytes, &Object::Dictionary(trailer_dict(trailer, trailer.size)));
    bytes.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", startxref).as_bytes());
}

fn trailer_dict(trailer: &TrailerInfo, size: u32) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Size", Object::Integer(size as i64));
    dict.set("Root", Object::Reference(trailer.root));
    if let Some(info) = trailer.info {
        dict.set("Info", Object::Reference(info));
    }
    if let Some(id) = &trailer.id {
        dict.set("ID", id.clone());
    }
    dict.set("Prev", Object::Integer(trailer.prev as i64));
    dict
}

/// Runs of consecutive object numbers as `(first, count)`
fn subsections(numbers: impl Iterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for n in numbers {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == n => *count += 1,
            _ => runs.push((n, 1)),
        }
    }
    runs
}

fn byte_width(value: usize) -> usize {
    let bits = usize::BITS - value.leading_zeros();
    (bits as usize).div_ceil(8).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ORIGINAL: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\nxref\n0 2\n0000000000 65535 f\r\n0000000009 00000 n\r\ntrailer\n<</Size 2/Root 1 0 R>>\nstartxref\n29\n%%EOF";

    fn trailer() -> TrailerInfo {
        TrailerInfo {
            root: (1, 0),
            info: None,
            id: None,
            prev: 29,
            size: 3,
        }
    }

    fn objects() -> Vec<(ObjectId, Object)> {
        let mut sig = Dictionary::new();
        sig.set(
            "Contents",
            Object::String(vec![0; 8], lopdf::StringFormat::Hexadecimal),
        );
        sig.set("ByteRange", Object::Array(vec![Object::Integer(0)]));
        vec![
            ((1, 0), Object::Dictionary(Dictionary::new())),
            ((2, 0), Object::Dictionary(sig)),
        ]
    }

    #[test]
    fn test_locate_startxref() {
        assert_eq!(locate_startxref(ORIGINAL).unwrap(), 29);
        assert!(matches!(
            locate_startxref(b"%PDF-1.4"),
            Err(AppendError::InvalidTrailer(_))
        ));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(XrefFormat::detect(ORIGINAL, 29), XrefFormat::Table);
        assert_eq!(XrefFormat::detect(b"5 0 obj <</Type/XRef>>", 0), XrefFormat::Stream);
        assert_eq!(XrefFormat::detect(b"abc", 99), XrefFormat::Table);
    }

    #[test]
    fn test_table_revision_layout() {
        let writer = RevisionWriter::new(XrefFormat::Table, true);
        let tracked = BTreeSet::from([(2, 0)]);
        let layout = writer
            .write(ORIGINAL, &objects(), &tracked, &trailer())
            .unwrap();

        // Original does not end in a newline
        assert_eq!(layout.bytes[0], b'\n');
        assert_eq!(layout.offsets[&(1, 0)], ORIGINAL.len() + 1);

        let mut full = ORIGINAL.to_vec();
        full.extend_from_slice(&layout.bytes);
        assert!(full[layout.offsets[&(2, 0)]..].starts_with(b"2 0 obj"));
        assert!(full[layout.startxref..].starts_with(b"xref\n1 2\n"));

        let contents = layout.span((2, 0), b"Contents").unwrap();
        assert_eq!(&full[contents], b"<0000000000000000>");
        let text = String::from_utf8_lossy(&layout.bytes);
        assert!(text.contains("/Prev 29"));
        assert!(text.contains("/Size 3"));
        assert!(text.ends_with(&format!("startxref\n{}\n%%EOF\n", layout.startxref)));
    }

    #[test]
    fn test_stream_revision_layout() {
        let writer = RevisionWriter::new(XrefFormat::Stream, false);
        let mut original = ORIGINAL.to_vec();
        original.push(b'\n');
        let layout = writer
            .write(&original, &objects(), &BTreeSet::new(), &trailer())
            .unwrap();

        assert_eq!(layout.offsets[&(1, 0)], original.len());
        assert_eq!(layout.offsets[&(3, 0)], layout.startxref);
        assert!(layout.spans.is_empty());

        let text = String::from_utf8_lossy(&layout.bytes);
        assert!(text.contains("/Type /XRef"));
        assert!(text.contains("/Index [1 3]"));
        assert!(text.contains("/W [1 4 2]"));
        assert!(text.contains("/Size 4"));
    }

    #[test]
    fn test_subsections() {
        assert_eq!(
            subsections([1, 2, 3, 7, 9, 10].into_iter()),
            vec![(1, 3), (7, 1), (9, 2)]
        );
        assert!(subsections(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_byte_width() {
        assert_eq!(byte_width(0), 1);
        assert_eq!(byte_width(255), 1);
        assert_eq!(byte_width(256), 2);
        assert_eq!(byte_width(u32::MAX as usize), 4);
    }
}
