//! Detached CMS signatures (`adbe.pkcs7.detached`)

use sha2::{digest::DynDigest, Sha256};
use shared_crypto::{build_signed_data, parse_signed_data, SigningIdentity};

use super::{SignatureHandler, SignatureInfo};
use crate::error::{AppendError, Result};

pub const SUB_FILTER: &str = "adbe.pkcs7.detached";

/// Default `Contents` reservation in bytes
pub const DEFAULT_RESERVE: usize = 8192;

/// Upper bound for a SignedData with one self-signed P-256 certificate
const MAX_SIGNED_DATA_SIZE: usize = 4096;

/// ECDSA P-256 / SHA-256 signatures wrapped in CMS SignedData
pub struct Pkcs7Handler<I: SigningIdentity> {
    identity: I,
    reserve: usize,
}

impl<I: SigningIdentity> Pkcs7Handler<I> {
    pub fn new(identity: I) -> Self {
        Self {
            identity,
            reserve: DEFAULT_RESERVE,
        }
    }

    pub fn with_reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }
}

impl<I: SigningIdentity> SignatureHandler for Pkcs7Handler<I> {
    fn init_signature(&self, info: &mut SignatureInfo) {
        info.filter = "Adobe.PPKLite".to_string();
        info.sub_filter = SUB_FILTER.to_string();
        info.reserved = self.reserve;
        if info.name.is_none() {
            info.name = self.identity.signer_name().map(str::to_string);
        }
    }

    fn signature_size(&self) -> usize {
        MAX_SIGNED_DATA_SIZE
    }

    fn new_digest(&self) -> Box<dyn DynDigest> {
        Box::new(Sha256::default())
    }

    fn sign(&self, info: &SignatureInfo, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.len() != 32 {
            return Err(AppendError::SignerError(format!(
                "expected a SHA-256 digest, got {} bytes",
                digest.len()
            )));
        }
        let signer_name = info
            .name
            .as_deref()
            .or_else(|| self.identity.signer_name())
            .unwrap_or("Unknown Signer");
        let signing_time = info.signing_time.format("%Y%m%d%H%M%SZ").to_string();

        Ok(build_signed_data(
            &self.identity,
            digest,
            signer_name,
            &signing_time,
        ))
    }

    fn is_applicable(&self, sub_filter: &[u8]) -> bool {
        sub_filter == SUB_FILTER.as_bytes()
    }

    fn validate(&self, contents: &[u8], digest: &[u8]) -> Result<bool> {
        let signed_data =
            parse_signed_data(contents).map_err(|e| AppendError::ValidationError(e.to_string()))?;
        signed_data
            .verify(digest)
            .map_err(|e| AppendError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::{sha256, EphemeralIdentity};

    fn handler() -> Pkcs7Handler<EphemeralIdentity> {
        Pkcs7Handler::new(EphemeralIdentity::generate().with_name("Alice"))
    }

    #[test]
    fn test_init_signature() {
        let mut info = SignatureInfo::default();
        handler().with_reserve(10_000).init_signature(&mut info);

        assert_eq!(info.sub_filter, SUB_FILTER);
        assert_eq!(info.reserved, 10_000);
        assert_eq!(info.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_sign_and_validate() {
        let handler = handler();
        let mut info = SignatureInfo::default();
        handler.init_signature(&mut info);

        let digest = sha256(b"covered bytes");
        let contents = handler.sign(&info, &digest).unwrap();
        assert!(contents.len() <= handler.signature_size());

        // Placeholder padding must not disturb parsing
        let mut padded = contents.clone();
        padded.resize(info.reserved, 0);
        assert!(handler.validate(&padded, &digest).unwrap());

        let other = sha256(b"different bytes");
        assert!(!handler.validate(&padded, &other).unwrap());
    }

    #[test]
    fn test_digest_is_sha256() {
        let handler = handler();
        let mut digest = handler.new_digest();
        digest.update(b"abc");
        assert_eq!(digest.finalize().to_vec(), sha256(b"abc").to_vec());
    }

    #[test]
    fn test_rejects_wrong_digest_length() {
        let handler = handler();
        let info = SignatureInfo::default();
        assert!(matches!(
            handler.sign(&info, &[0u8; 20]),
            Err(AppendError::SignerError(_))
        ));
    }

    #[test]
    fn test_applicability_and_garbage() {
        let handler = handler();
        assert!(handler.is_applicable(b"adbe.pkcs7.detached"));
        assert!(!handler.is_applicable(b"ETSI.CAdES.detached"));
        assert!(matches!(
            handler.validate(&[0x01, 0x02], &[0u8; 32]),
            Err(AppendError::ValidationError(_))
        ));
    }
}
