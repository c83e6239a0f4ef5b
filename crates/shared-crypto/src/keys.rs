//! ECDSA P-256 signing identities

use p256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    SecretKey,
};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Anything that can produce signatures for a PDF signature dictionary
pub trait SigningIdentity {
    /// Public key as SEC1-encoded bytes (uncompressed point)
    fn public_key_der(&self) -> Vec<u8>;

    /// Public key as hex string
    fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_der())
    }

    /// Sign raw data (SHA-256 is applied by the signer) and return a DER signature
    fn sign(&self, data: &[u8]) -> Vec<u8>;

    /// Verify a DER signature over raw data
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        verify_with_public_key(&self.public_key_der(), data, signature).unwrap_or(false)
    }

    /// Name used for the certificate subject when none is supplied
    fn signer_name(&self) -> Option<&str> {
        None
    }
}

/// An in-memory P-256 key pair
pub struct EphemeralIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    name: Option<String>,
}

impl EphemeralIdentity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let secret_key = SecretKey::random(&mut rand_core::OsRng);
        Self::from_secret(secret_key)
    }

    /// Import from previously exported private key bytes
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret(secret_key))
    }

    fn from_secret(secret_key: SecretKey) -> Self {
        let signing_key = SigningKey::from(&secret_key);
        let verifying_key = VerifyingKey::from(&signing_key);

        Self {
            signing_key,
            verifying_key,
            name: None,
        }
    }

    /// Attach a display name used as certificate subject
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Export the private key scalar
    pub fn export_private_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl SigningIdentity for EphemeralIdentity {
    fn public_key_der(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_der().as_bytes().to_vec()
    }

    fn signer_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Verify a DER-encoded ECDSA signature against a SEC1 public key
pub fn verify_with_public_key(
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    match Signature::from_der(signature) {
        Ok(sig) => Ok(key.verify(data, &sig).is_ok()),
        Err(_) => Ok(false),
    }
}

/// Hash data using SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
