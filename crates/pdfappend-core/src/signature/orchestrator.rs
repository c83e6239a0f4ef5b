//! Two-pass signing
//!
//! The revision is serialized once with fixed-width placeholders, the
//! placeholders are located through the writer's span metadata, and the
//! final values are patched in place. Patching never changes the length of
//! the revision, so every recorded offset stays valid.
//!
//! Each signature's byte ranges exclude the `Contents` values of *all*
//! signatures in the revision, so every signature in a multi-signature
//! revision can be verified on its own.

use std::collections::BTreeSet;
use std::ops::Range;

use lopdf::{Object, ObjectId, StringFormat};
use sha2::digest::DynDigest;
use tracing::debug;

use super::{byte_range_placeholder, render_byte_range, PdfSignature};
use crate::error::{AppendError, Result};
use crate::revision::{RevisionLayout, RevisionWriter, TrailerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    NoSignature,
    Reserved,
    MockWritten,
    Digested,
    Signed,
    Patched,
}

impl SigningState {
    pub fn name(self) -> &'static str {
        match self {
            SigningState::NoSignature => "NoSignature",
            SigningState::Reserved => "Reserved",
            SigningState::MockWritten => "MockWritten",
            SigningState::Digested => "Digested",
            SigningState::Signed => "Signed",
            SigningState::Patched => "Patched",
        }
    }
}

/// A signature dictionary and its final object number
pub struct PendingSignature<'s> {
    pub object: ObjectId,
    pub signature: &'s PdfSignature,
}

pub struct SigningSession<'s> {
    state: SigningState,
    pending: Vec<PendingSignature<'s>>,
    layout: Option<RevisionLayout>,
    byte_range: Vec<(usize, usize)>,
    digests: Vec<Vec<u8>>,
    payloads: Vec<Vec<u8>>,
}

impl<'s> SigningSession<'s> {
    pub fn new(pending: Vec<PendingSignature<'s>>) -> Self {
        Self {
            state: SigningState::NoSignature,
            pending,
            layout: None,
            byte_range: Vec::new(),
            digests: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    /// Covered `(offset, length)` pairs, available once digested
    pub fn byte_range(&self) -> &[(usize, usize)] {
        &self.byte_range
    }

    fn require(&self, expected: SigningState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AppendError::InvalidState {
                expected: expected.name(),
                found: self.state.name(),
            })
        }
    }

    fn advance(&mut self, next: SigningState) {
        debug!(from = self.state.name(), to = next.name(), "signing state");
        self.state = next;
    }

    /// Install fixed-width placeholders into the rendered signature dictionaries
    pub fn reserve(&mut self, objects: &mut [(ObjectId, Object)]) -> Result<()> {
        self.require(SigningState::NoSignature)?;

        let count = self.pending.len();
        for pending in &self.pending {
            let info = pending.signature.info();
            let needed = pending.signature.handler().signature_size();
            if info.reserved < needed {
                return Err(AppendError::SignatureTooLarge {
                    needed,
                    reserved: info.reserved,
                });
            }

            let dict = objects
                .iter_mut()
                .find(|(id, _)| *id == pending.object)
                .and_then(|(_, object)| object.as_dict_mut().ok())
                .ok_or(AppendError::ObjectNotFound(pending.object.0, pending.object.1))?;
            dict.set(
                "Contents",
                Object::String(vec![0; info.reserved], StringFormat::Hexadecimal),
            );
            dict.set("ByteRange", byte_range_placeholder(count));
        }

        self.advance(SigningState::Reserved);
        Ok(())
    }

    /// Serialize the revision once, recording placeholder positions
    pub fn mock_write(
        &mut self,
        writer: &RevisionWriter,
        original: &[u8],
        objects: &[(ObjectId, Object)],
        trailer: &TrailerInfo,
    ) -> Result<()> {
        self.require(SigningState::Reserved)?;

        let tracked: BTreeSet<ObjectId> = self.pending.iter().map(|p| p.object).collect();
        let layout = writer.write(original, objects, &tracked, trailer)?;
        for pending in &self.pending {
            for key in [b"Contents".as_slice(), b"ByteRange".as_slice()] {
                if layout.span(pending.object, key).is_none() {
                    return Err(AppendError::ByteRangeOverflow(format!(
                        "signature {:?} has no {} placeholder",
                        pending.object,
                        String::from_utf8_lossy(key)
                    )));
                }
            }
        }

        self.layout = Some(layout);
        self.advance(SigningState::MockWritten);
        Ok(())
    }

    /// Patch `ByteRange` fields, then digest the covered bytes per signature
    pub fn digest(&mut self, original: &[u8]) -> Result<()> {
        self.require(SigningState::MockWritten)?;
        let layout = self.layout.as_mut().ok_or(AppendError::InvalidState {
            expected: SigningState::MockWritten.name(),
            found: "no layout",
        })?;

        let mut payloads: Vec<Range<usize>> = self
            .pending
            .iter()
            .filter_map(|p| layout.span(p.object, b"Contents"))
            .collect();
        payloads.sort_by_key(|range| range.start);
        self.byte_range = covered_ranges(&payloads, layout.total_len());

        let rendered = render_byte_range(&self.byte_range);
        for pending in &self.pending {
            let span = layout
                .span(pending.object, b"ByteRange")
                .ok_or_else(|| AppendError::ByteRangeOverflow("ByteRange span lost".into()))?;
            if rendered.len() > span.len() {
                return Err(AppendError::ByteRangeOverflow(format!(
                    "{} does not fit in {} bytes",
                    rendered,
                    span.len()
                )));
            }
            let local = layout.local(&span);
            let target = &mut layout.bytes[local];
            target[..rendered.len()].copy_from_slice(rendered.as_bytes());
            target[rendered.len()..].fill(b' ');
        }

        let layout = &*layout;
        self.digests = self
            .pending
            .iter()
            .map(|pending| {
                let mut digest = pending.signature.handler().new_digest();
                for &(offset, length) in &self.byte_range {
                    feed(digest.as_mut(), original, layout, offset..offset + length);
                }
                digest.finalize().to_vec()
            })
            .collect();

        self.advance(SigningState::Digested);
        Ok(())
    }

    /// Ask every handler for its signature value
    pub fn sign(&mut self) -> Result<()> {
        self.require(SigningState::Digested)?;

        self.payloads = self
            .pending
            .iter()
            .zip(&self.digests)
            .map(|(pending, digest)| {
                pending
                    .signature
                    .handler()
                    .sign(pending.signature.info(), digest)
            })
            .collect::<Result<_>>()?;

        self.advance(SigningState::Signed);
        Ok(())
    }

    /// Overwrite each `Contents` placeholder with its hex-encoded value
    pub fn patch(&mut self) -> Result<()> {
        self.require(SigningState::Signed)?;
        let layout = self.layout.as_mut().ok_or(AppendError::InvalidState {
            expected: SigningState::Signed.name(),
            found: "no layout",
        })?;

        for (pending, payload) in self.pending.iter().zip(&self.payloads) {
            let span = layout
                .span(pending.object, b"Contents")
                .ok_or_else(|| AppendError::ByteRangeOverflow("Contents span lost".into()))?;
            // Inside the angle brackets
            let local = layout.local(&span);
            let inner = local.start + 1..local.end - 1;
            let encoded = hex::encode(payload);
            if encoded.len() > inner.len() {
                return Err(AppendError::SignatureTooLarge {
                    needed: payload.len(),
                    reserved: inner.len() / 2,
                });
            }

            let target = &mut layout.bytes[inner];
            target[..encoded.len()].copy_from_slice(encoded.as_bytes());
            target[encoded.len()..].fill(b'0');
        }

        self.advance(SigningState::Patched);
        Ok(())
    }

    /// The signed revision
    pub fn finish(self) -> Result<RevisionLayout> {
        self.require(SigningState::Patched)?;
        self.layout.ok_or(AppendError::InvalidState {
            expected: SigningState::Patched.name(),
            found: "no layout",
        })
    }

    /// Run every step in order
    pub fn run(
        mut self,
        writer: &RevisionWriter,
        original: &[u8],
        objects: &mut [(ObjectId, Object)],
        trailer: &TrailerInfo,
    ) -> Result<RevisionLayout> {
        self.reserve(objects)?;
        self.mock_write(writer, original, objects, trailer)?;
        self.digest(original)?;
        self.sign()?;
        self.patch()?;
        self.finish()
    }
}

/// Complement of the payload spans over `0..total`, as `(offset, length)`
pub fn covered_ranges(payloads: &[Range<usize>], total: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(payloads.len() + 1);
    let mut start = 0;
    for payload in payloads {
        ranges.push((start, payload.start - start));
        start = payload.end;
    }
    ranges.push((start, total - start));
    ranges
}

/// Feed an absolute range spanning the original file and the revision
fn feed(digest: &mut dyn DynDigest, original: &[u8], layout: &RevisionLayout, range: Range<usize>) {
    let base = layout.base;
    if range.start < base {
        digest.update(&original[range.start..range.end.min(base)]);
    }
    if range.end > base {
        let start = range.start.max(base) - base;
        digest.update(&layout.bytes[start..range.end - base]);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: covered ranges and payloads tile the whole file
        #[test]
        fn covered_ranges_tile_the_file(
            cuts in prop::collection::btree_set(1usize..1000, 0..12),
            total_extra in 1usize..100,
        ) {
            let cuts: Vec<usize> = cuts.into_iter().collect();
            let payloads: Vec<Range<usize>> = cuts
                .chunks_exact(2)
                .map(|pair| pair[0]..pair[1])
                .collect();
            let total = cuts.last().copied().unwrap_or(0) + total_extra;
            let ranges = covered_ranges(&payloads, total);

            prop_assert_eq!(ranges.len(), payloads.len() + 1);
            let mut covered: usize = ranges.iter().map(|(_, len)| len).sum();
            covered += payloads.iter().map(|p| p.len()).sum::<usize>();
            prop_assert_eq!(covered, total);
            for window in ranges.windows(2) {
                prop_assert!(window[0].0 + window[0].1 <= window[1].0);
            }
        }
    }
}
