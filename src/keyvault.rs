use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::capability::{SignatureParts, SIGNATURE_HALF_LEN};
use crate::error::LockVaultError;
use crate::Result;

/// Longest plaintext the vault will sign or verify.
pub const MAX_SIGNATURE_LENGTH: usize = 255;

/// On-disk form of the key pair. The attestation string is stored next
/// to the raw material so the sealed file alone suffices for extraction.
#[derive(Serialize, Deserialize)]
struct SealedKeys {
    private_key: String,
    public_key: String,
    encoded_public_key: String,
}

/// Holder of the ECDSA-P256 key pair. The private scalar never leaves
/// this module; workers sign through per-thread [`SigningContext`]s.
pub struct KeyVault {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    encoded_public_key: String,
}

impl KeyVault {
    /// Unseals the key pair from `path`, generating and sealing a fresh
    /// one when no sealed material exists yet.
    pub fn load_or_generate(path: &Path) -> Result<KeyVault> {
        if path.exists() {
            KeyVault::unseal(path)
        } else {
            let vault = KeyVault::generate();
            vault.seal(path)?;
            Ok(vault)
        }
    }

    fn generate() -> KeyVault {
        info!("creating new key pair");
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded_public_key = encode_public_key(&verifying_key);
        KeyVault {
            signing_key,
            verifying_key,
            encoded_public_key,
        }
    }

    fn unseal(path: &Path) -> Result<KeyVault> {
        debug!("unsealing keys from {}", path.display());
        let sealed: SealedKeys = serde_json::from_str(&fs::read_to_string(path)?)?;
        let scalar = STANDARD
            .decode(&sealed.private_key)
            .map_err(|_| LockVaultError::BadKeyMaterial)?;
        let signing_key = SigningKey::from_slice(&scalar)?;
        let verifying_key = VerifyingKey::from(&signing_key);

        // The sealed public key must belong to the sealed private key.
        let sealed_public = STANDARD
            .decode(&sealed.public_key)
            .map_err(|_| LockVaultError::BadKeyMaterial)?;
        if sealed_public != verifying_key.to_encoded_point(false).as_bytes() {
            return Err(LockVaultError::BadKeyMaterial);
        }

        Ok(KeyVault {
            signing_key,
            verifying_key,
            encoded_public_key: sealed.encoded_public_key,
        })
    }

    fn seal(&self, path: &Path) -> Result<()> {
        debug!("sealing keys to {}", path.display());
        let sealed = SealedKeys {
            private_key: STANDARD.encode(self.signing_key.to_bytes()),
            public_key: STANDARD.encode(self.verifying_key.to_encoded_point(false).as_bytes()),
            encoded_public_key: self.encoded_public_key.clone(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string(&sealed)?)?;
        Ok(())
    }

    pub fn sign(&self, plaintext: &[u8]) -> Result<SignatureParts> {
        sign_with(&self.signing_key, plaintext)
    }

    pub fn verify(&self, plaintext: &[u8], parts: &SignatureParts) -> bool {
        if plaintext.len() > MAX_SIGNATURE_LENGTH {
            return false;
        }
        let mut bytes = [0u8; SIGNATURE_HALF_LEN * 2];
        bytes[..SIGNATURE_HALF_LEN].copy_from_slice(&parts.r);
        bytes[SIGNATURE_HALF_LEN..].copy_from_slice(&parts.s);
        match Signature::from_slice(&bytes) {
            Ok(signature) => self.verifying_key.verify(plaintext, &signature).is_ok(),
            Err(_) => false,
        }
    }

    /// Base64 of the SEC1 public key with the encoded length appended,
    /// for attestation and simple extraction from the sealed file.
    pub fn encoded_public_key(&self) -> &str {
        &self.encoded_public_key
    }

    /// A signing context for one worker thread.
    pub(crate) fn signing_context(&self) -> SigningContext {
        SigningContext {
            signing_key: self.signing_key.clone(),
        }
    }
}

/// Per-thread signing handle; workers own one each so signing never
/// shares state across threads.
pub(crate) struct SigningContext {
    signing_key: SigningKey,
}

impl SigningContext {
    pub(crate) fn sign(&self, plaintext: &[u8]) -> Result<SignatureParts> {
        sign_with(&self.signing_key, plaintext)
    }
}

fn sign_with(signing_key: &SigningKey, plaintext: &[u8]) -> Result<SignatureParts> {
    if plaintext.len() > MAX_SIGNATURE_LENGTH {
        return Err(LockVaultError::PlaintextTooLong);
    }
    let signature: Signature = signing_key.try_sign(plaintext)?;
    let bytes = signature.to_bytes();
    let mut parts = SignatureParts {
        r: [0; SIGNATURE_HALF_LEN],
        s: [0; SIGNATURE_HALF_LEN],
    };
    parts.r.copy_from_slice(&bytes[..SIGNATURE_HALF_LEN]);
    parts.s.copy_from_slice(&bytes[SIGNATURE_HALF_LEN..]);
    Ok(parts)
}

fn encode_public_key(verifying_key: &VerifyingKey) -> String {
    let point = verifying_key.to_encoded_point(false);
    let mut encoded = STANDARD.encode(point.as_bytes());
    let length = encoded.len();
    encoded.push_str(&length.to_string());
    encoded
}
