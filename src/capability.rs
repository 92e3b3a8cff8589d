use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::LockVaultError;
use crate::lock::LockMode;
use crate::{Result, RowID, TransactionID};

/// Byte length of each half (r, s) of a P-256 ECDSA signature.
pub const SIGNATURE_HALF_LEN: usize = 32;

/// Length of an encoded capability: two base64 halves joined by `-`.
/// Computed from the signature size so a different curve cannot silently
/// truncate tokens.
pub const CAPABILITY_LEN: usize = base64_len(SIGNATURE_HALF_LEN) * 2 + 1;

const fn base64_len(bytes: usize) -> usize {
    (bytes + 2) / 3 * 4
}

/// The raw halves of a signature as they travel inside a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
    pub r: [u8; SIGNATURE_HALF_LEN],
    pub s: [u8; SIGNATURE_HALF_LEN],
}

/// Canonical plaintext a capability signs: `<tx>_<row>_<M>_<timeout>`
/// with `M` being `S` or `X`.
pub fn descriptor(
    transaction_id: TransactionID,
    row_id: RowID,
    mode: LockMode,
    block_timeout: u32,
) -> String {
    let mode = match mode {
        LockMode::Shared => "S",
        LockMode::Exclusive => "X",
    };
    format!("{}_{}_{}_{}", transaction_id, row_id, mode, block_timeout)
}

/// Fixed block-timeout policy. The field is reserved in the descriptor so
/// lease expiry can be introduced without breaking the wire format.
pub(crate) fn block_timeout() -> u32 {
    0
}

pub fn encode(parts: &SignatureParts) -> String {
    let capability = format!("{}-{}", STANDARD.encode(parts.r), STANDARD.encode(parts.s));
    debug_assert_eq!(capability.len(), CAPABILITY_LEN);
    capability
}

/// Splits on the first `-` and decodes both halves. Anything that does
/// not decode to two signature halves is rejected.
pub fn decode(capability: &str) -> Result<SignatureParts> {
    let (r, s) = capability
        .split_once('-')
        .ok_or(LockVaultError::BadCapability)?;
    Ok(SignatureParts {
        r: decode_half(r)?,
        s: decode_half(s)?,
    })
}

fn decode_half(half: &str) -> Result<[u8; SIGNATURE_HALF_LEN]> {
    let bytes = STANDARD
        .decode(half)
        .map_err(|_| LockVaultError::BadCapability)?;
    bytes
        .try_into()
        .map_err(|_| LockVaultError::BadCapability)
}
