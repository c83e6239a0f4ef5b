//! CMS (Cryptographic Message Syntax) for detached PDF signatures
//!
//! Builds a PKCS#7 SignedData structure suitable for the `Contents` entry of
//! an `adbe.pkcs7.detached` signature dictionary, with these signed
//! attributes:
//! - content-type
//! - signing-time
//! - message-digest
//! - signing-certificate-v2 (ESS)
//!
//! The signature value covers the DER encoding of the signed attributes as
//! a SET, as required by RFC 5652 §5.4. The parser is deliberately narrow:
//! it understands the layout produced here and nothing more.

use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::keys::{verify_with_public_key, SigningIdentity};

/// OID for SHA-256: 2.16.840.1.101.3.4.2.1
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// OID for ECDSA with SHA-256: 1.2.840.10045.4.3.2
const OID_ECDSA_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];

/// OID for id-data (PKCS#7): 1.2.840.113549.1.7.1
const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];

/// OID for id-signedData (PKCS#7): 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];

/// OID for content-type attribute: 1.2.840.113549.1.9.3
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];

/// OID for message-digest attribute: 1.2.840.113549.1.9.4
const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];

/// OID for signing-time attribute: 1.2.840.113549.1.9.5
const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05];

/// OID for id-aa-signingCertificateV2: 1.2.840.113549.1.9.16.2.47
const OID_SIGNING_CERTIFICATE_V2: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x2F,
];

/// Build a CMS SignedData structure over a precomputed document digest
///
/// # Arguments
/// * `identity` - key used to sign the signed attributes
/// * `document_digest` - SHA-256 digest of the PDF byte range
/// * `signer_name` - common name for the embedded certificate
/// * `signing_time` - UTC time as `YYYYMMDDHHMMSSZ`
pub fn build_signed_data<I: SigningIdentity + ?Sized>(
    identity: &I,
    document_digest: &[u8],
    signer_name: &str,
    signing_time: &str,
) -> Vec<u8> {
    let public_key = identity.public_key_der();
    let certificate = build_self_signed_cert(&public_key, signer_name, signing_time);

    let signed_attrs = build_signed_attributes(document_digest, signing_time, &certificate);

    // The signature covers the attributes re-tagged as a SET
    let signature = identity.sign(&build_set(&signed_attrs));

    let signer_info = build_signer_info(&signed_attrs, &signature, signer_name);
    let signed_data = build_signed_data_content(&certificate, &signer_info);

    build_content_info(&signed_data)
}

/// Concatenated signed attributes (without the outer SET header)
fn build_signed_attributes(document_digest: &[u8], signing_time: &str, certificate: &[u8]) -> Vec<u8> {
    let mut attrs = Vec::new();

    attrs.extend(build_attribute(OID_CONTENT_TYPE, &build_oid(OID_DATA)));
    attrs.extend(build_attribute(OID_SIGNING_TIME, &build_utc_time(signing_time)));
    attrs.extend(build_attribute(
        OID_MESSAGE_DIGEST,
        &build_octet_string(document_digest),
    ));
    attrs.extend(build_signing_certificate_v2(certificate));

    attrs
}

/// ESS signing-certificate-v2 attribute
/// ESSCertIDv2 ::= SEQUENCE { hashAlgorithm, certHash }
fn build_signing_certificate_v2(certificate: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(certificate);
    let cert_hash: [u8; 32] = hasher.finalize().into();

    let hash_alg = build_algorithm_identifier(OID_SHA256);
    let hash_value = build_octet_string(&cert_hash);
    let ess_cert_id = build_sequence(&[&hash_alg, &hash_value]);
    let certs = build_sequence(&[&ess_cert_id]);
    let signing_cert = build_sequence(&[&certs]);

    build_attribute(OID_SIGNING_CERTIFICATE_V2, &signing_cert)
}

/// Single attribute: SEQUENCE { OID, SET { value } }
fn build_attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    let oid_encoded = build_oid(oid);
    let value_set = build_set(value);
    build_sequence(&[&oid_encoded, &value_set])
}

fn build_signer_info(signed_attrs: &[u8], signature: &[u8], signer_name: &str) -> Vec<u8> {
    let mut content = Vec::new();

    content.extend(build_integer(&[1]));
    content.extend(build_issuer_and_serial(signer_name));
    content.extend(build_algorithm_identifier(OID_SHA256));
    // [0] IMPLICIT SET OF Attribute
    content.extend(build_context_specific(0, signed_attrs));
    content.extend(build_algorithm_identifier(OID_ECDSA_SHA256));
    content.extend(build_octet_string(signature));

    build_sequence(&[&content])
}

/// Self-signed certificate carrying the signer's public key
fn build_self_signed_cert(public_key: &[u8], signer_name: &str, signing_time: &str) -> Vec<u8> {
    let mut tbs = Vec::new();

    tbs.extend(build_context_specific(0, &build_integer(&[2])));
    tbs.extend(build_integer(&[1]));
    tbs.extend(build_algorithm_identifier(OID_ECDSA_SHA256));
    tbs.extend(build_name(signer_name));
    tbs.extend(build_validity(signing_time));
    tbs.extend(build_name(signer_name));
    tbs.extend(build_subject_public_key_info(public_key));

    let tbs_cert = build_sequence(&[&tbs]);

    let mut cert = Vec::new();
    cert.extend(&tbs_cert);
    cert.extend(build_algorithm_identifier(OID_ECDSA_SHA256));
    cert.extend(build_bit_string(&[0; 64]));

    build_sequence(&[&cert])
}

fn build_signed_data_content(certificate: &[u8], signer_info: &[u8]) -> Vec<u8> {
    let mut content = Vec::new();

    content.extend(build_integer(&[1]));
    content.extend(build_set(&build_algorithm_identifier(OID_SHA256)));
    // EncapsulatedContentInfo without content (detached)
    content.extend(build_sequence(&[&build_oid(OID_DATA)]));
    content.extend(build_context_specific(0, certificate));
    content.extend(build_set(signer_info));

    build_sequence(&[&content])
}

fn build_content_info(signed_data: &[u8]) -> Vec<u8> {
    let oid = build_oid(OID_SIGNED_DATA);
    let content = build_context_specific(0, signed_data);
    build_sequence(&[&oid, &content])
}

// === Parsing ===

/// The pieces of a SignedData needed to check a detached PDF signature
#[derive(Debug, Clone)]
pub struct ParsedSignedData {
    /// message-digest attribute value
    pub message_digest: Vec<u8>,
    /// DER of the signed attributes re-tagged as SET (the signed message)
    pub signed_attrs: Vec<u8>,
    /// DER ECDSA signature
    pub signature: Vec<u8>,
    /// SEC1 public key from the first embedded certificate
    pub public_key: Vec<u8>,
}

impl ParsedSignedData {
    /// Check the message digest and the signature over the signed attributes
    pub fn verify(&self, document_digest: &[u8]) -> Result<bool, CryptoError> {
        if self.message_digest != document_digest {
            return Ok(false);
        }
        verify_with_public_key(&self.public_key, &self.signed_attrs, &self.signature)
    }
}

/// Parse a SignedData produced by [`build_signed_data`]
///
/// Trailing bytes after the outer ContentInfo (the zero padding of a PDF
/// `Contents` placeholder) are ignored.
pub fn parse_signed_data(der: &[u8]) -> Result<ParsedSignedData, CryptoError> {
    let (content_info, _) = expect_tlv(der, 0x30)?;
    let (oid, rest) = expect_tlv(content_info, 0x06)?;
    if oid != OID_SIGNED_DATA {
        return Err(CryptoError::MalformedDer("not a SignedData".into()));
    }
    let (wrapped, _) = expect_tlv(rest, 0xA0)?;
    let (signed_data, _) = expect_tlv(wrapped, 0x30)?;

    let (_, rest) = expect_tlv(signed_data, 0x02)?;
    let (_, rest) = expect_tlv(rest, 0x31)?;
    let (_, rest) = expect_tlv(rest, 0x30)?;

    let (tag, certs, rest) = parse_tlv(rest)?;
    if tag != 0xA0 {
        return Err(CryptoError::MissingElement("certificates"));
    }
    let public_key = certificate_public_key(certs)?;

    let (signer_infos, _) = expect_tlv(rest, 0x31)?;
    let (signer_info, _) = expect_tlv(signer_infos, 0x30)?;

    let (_, rest) = expect_tlv(signer_info, 0x02)?;
    let (_, rest) = expect_tlv(rest, 0x30)?;
    let (_, rest) = expect_tlv(rest, 0x30)?;
    let (attrs, rest) = expect_tlv(rest, 0xA0)?;
    let (_, rest) = expect_tlv(rest, 0x30)?;
    let (signature, _) = expect_tlv(rest, 0x04)?;

    let message_digest = find_message_digest(attrs)?;

    Ok(ParsedSignedData {
        message_digest,
        signed_attrs: build_set(attrs),
        signature: signature.to_vec(),
        public_key,
    })
}

fn certificate_public_key(certs: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (cert, _) = expect_tlv(certs, 0x30)?;
    let (tbs, _) = expect_tlv(cert, 0x30)?;

    // version, serial, algorithm, issuer, validity, subject
    let mut rest = tbs;
    for expected in [0xA0, 0x02, 0x30, 0x30, 0x30, 0x30] {
        let (_, next) = expect_tlv(rest, expected)?;
        rest = next;
    }

    let (spki, _) = expect_tlv(rest, 0x30)?;
    let (_, rest) = expect_tlv(spki, 0x30)?;
    let (bits, _) = expect_tlv(rest, 0x03)?;

    match bits.split_first() {
        Some((0, key)) => Ok(key.to_vec()),
        _ => Err(CryptoError::MalformedDer("unexpected public key bit string".into())),
    }
}

fn find_message_digest(mut attrs: &[u8]) -> Result<Vec<u8>, CryptoError> {
    while !attrs.is_empty() {
        let (attr, rest) = expect_tlv(attrs, 0x30)?;
        let (oid, values) = expect_tlv(attr, 0x06)?;
        if oid == OID_MESSAGE_DIGEST {
            let (set, _) = expect_tlv(values, 0x31)?;
            let (digest, _) = expect_tlv(set, 0x04)?;
            return Ok(digest.to_vec());
        }
        attrs = rest;
    }
    Err(CryptoError::MissingElement("message-digest"))
}

// === ASN.1 DER Encoding Helpers ===

fn build_sequence(items: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = items.iter().flat_map(|i| i.iter().copied()).collect();
    build_tlv(0x30, &content)
}

fn build_set(content: &[u8]) -> Vec<u8> {
    build_tlv(0x31, content)
}

fn build_oid(oid_bytes: &[u8]) -> Vec<u8> {
    build_tlv(0x06, oid_bytes)
}

fn build_integer(value: &[u8]) -> Vec<u8> {
    // Leading zero keeps the value positive when the high bit is set
    if !value.is_empty() && value[0] & 0x80 != 0 {
        let mut padded = vec![0];
        padded.extend(value);
        build_tlv(0x02, &padded)
    } else {
        build_tlv(0x02, value)
    }
}

fn build_octet_string(content: &[u8]) -> Vec<u8> {
    build_tlv(0x04, content)
}

fn build_bit_string(content: &[u8]) -> Vec<u8> {
    let mut bs = vec![0];
    bs.extend(content);
    build_tlv(0x03, &bs)
}

fn build_utf8_string(s: &str) -> Vec<u8> {
    build_tlv(0x0C, s.as_bytes())
}

fn build_utc_time(time: &str) -> Vec<u8> {
    // YYYYMMDDHHMMSSZ -> YYMMDDHHMMSSZ
    let formatted = if time.len() > 13 { &time[2..] } else { time };
    build_tlv(0x17, formatted.as_bytes())
}

fn build_context_specific(tag: u8, content: &[u8]) -> Vec<u8> {
    build_tlv(0xA0 | tag, content)
}

fn build_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut result = vec![tag];
    let len = content.len();

    if len < 128 {
        result.push(len as u8);
    } else if len < 256 {
        result.push(0x81);
        result.push(len as u8);
    } else {
        result.push(0x82);
        result.push((len >> 8) as u8);
        result.push(len as u8);
    }

    result.extend(content);
    result
}

fn build_algorithm_identifier(oid: &[u8]) -> Vec<u8> {
    let oid_encoded = build_oid(oid);
    let null = vec![0x05, 0x00];
    build_sequence(&[&oid_encoded, &null])
}

fn build_name(cn: &str) -> Vec<u8> {
    // RDN: SET { SEQUENCE { OID (CN), UTF8String } }
    let cn_oid = build_oid(&[0x55, 0x04, 0x03]);
    let cn_value = build_utf8_string(cn);
    let attr = build_sequence(&[&cn_oid, &cn_value]);
    let rdn = build_set(&attr);
    build_sequence(&[&rdn])
}

fn build_validity(signing_time: &str) -> Vec<u8> {
    let not_before = build_utc_time(signing_time);
    let not_after = match signing_time.get(..4).and_then(|y| y.parse::<u32>().ok()) {
        Some(year) => build_utc_time(&format!("{}{}", year + 1, &signing_time[4..])),
        None => build_utc_time(signing_time),
    };
    build_sequence(&[&not_before, &not_after])
}

fn build_issuer_and_serial(signer_name: &str) -> Vec<u8> {
    let issuer = build_name(signer_name);
    let serial = build_integer(&[1]);
    build_sequence(&[&issuer, &serial])
}

fn build_subject_public_key_info(public_key: &[u8]) -> Vec<u8> {
    // id-ecPublicKey 1.2.840.10045.2.1, prime256v1 1.2.840.10045.3.1.7
    let ec_oid = build_oid(&[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01]);
    let p256_oid = build_oid(&[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07]);
    let alg = build_sequence(&[&ec_oid, &p256_oid]);
    let pk_bits = build_bit_string(public_key);
    build_sequence(&[&alg, &pk_bits])
}

// === ASN.1 DER Parsing Helpers ===

/// Split one TLV off the front: (tag, content, remaining)
fn parse_tlv(data: &[u8]) -> Result<(u8, &[u8], &[u8]), CryptoError> {
    let (&tag, after_tag) = data
        .split_first()
        .ok_or_else(|| CryptoError::MalformedDer("empty TLV data".into()))?;

    let (len, header_len) = parse_length(after_tag)?;
    let total_header = 1 + header_len;

    if data.len() < total_header + len {
        return Err(CryptoError::MalformedDer("TLV data too short".into()));
    }

    Ok((
        tag,
        &data[total_header..total_header + len],
        &data[total_header + len..],
    ))
}

fn expect_tlv(data: &[u8], expected: u8) -> Result<(&[u8], &[u8]), CryptoError> {
    let (tag, content, rest) = parse_tlv(data)?;
    if tag != expected {
        return Err(CryptoError::MalformedDer(format!(
            "expected tag 0x{:02X}, found 0x{:02X}",
            expected, tag
        )));
    }
    Ok((content, rest))
}

fn parse_length(data: &[u8]) -> Result<(usize, usize), CryptoError> {
    let first = *data
        .first()
        .ok_or_else(|| CryptoError::MalformedDer("no length byte".into()))?;

    if first < 128 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > 3 {
        return Err(CryptoError::MalformedDer("unsupported length encoding".into()));
    }
    if data.len() < 1 + count {
        return Err(CryptoError::MalformedDer("length bytes missing".into()));
    }

    let len = data[1..=count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((len, 1 + count))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: TLV encoding and parsing agree on content and remainder
        #[test]
        fn tlv_roundtrip(content in prop::collection::vec(any::<u8>(), 0..2000), tail in prop::collection::vec(any::<u8>(), 0..8)) {
            let mut tlv = build_tlv(0x04, &content);
            tlv.extend(&tail);

            let (tag, parsed, rest) = parse_tlv(&tlv).unwrap();
            prop_assert_eq!(tag, 0x04);
            prop_assert_eq!(parsed, &content[..]);
            prop_assert_eq!(rest, &tail[..]);
        }

        /// Property: Integer encoding handles high-bit padding
        #[test]
        fn integer_high_bit_handled(byte in any::<u8>()) {
            let int = build_integer(&[byte]);
            prop_assert_eq!(int[0], 0x02);
            if byte & 0x80 != 0 {
                prop_assert_eq!(&int[1..], &[2, 0, byte][..]);
            } else {
                prop_assert_eq!(&int[1..], &[1, byte][..]);
            }
        }

        /// Property: truncated input never panics
        #[test]
        fn parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_signed_data(&data);
        }
    }
}
