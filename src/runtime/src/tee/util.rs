//! Byte-level helpers shared by the provider adapters.

use sha2::{Digest, Sha256};
use tee_attest_core::tee::{Digest32, VerificationFailure};

/// Constant-time comparison for equal-length byte slices.
///
/// Length is not secret; a length mismatch returns early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Constant-time membership test over a list of identities.
///
/// Every candidate is compared, so timing does not reveal the match position.
pub fn contains_constant_time(list: &[Digest32], needle: &Digest32) -> bool {
    list.iter()
        .fold(false, |found, item| constant_time_eq(&item.0, &needle.0) | found)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha256_digest(data: &[u8]) -> Digest32 {
    Digest32(sha256(data))
}

/// Normalize caller-supplied evidence to binary.
///
/// Evidence that is entirely ASCII hex (after trimming whitespace and an
/// optional `0x` prefix) is hex-decoded; anything else is taken verbatim.
pub fn decode_evidence(evidence: &[u8]) -> Result<Vec<u8>, VerificationFailure> {
    if evidence.is_empty() {
        return Err(VerificationFailure::malformed("evidence is empty"));
    }

    if let Some(hex_str) = as_hex_text(evidence) {
        let decoded = hex::decode(hex_str)
            .map_err(|e| VerificationFailure::malformed(format!("invalid hex evidence: {}", e)))?;
        if decoded.is_empty() {
            return Err(VerificationFailure::malformed("evidence is empty"));
        }
        return Ok(decoded);
    }

    Ok(evidence.to_vec())
}

fn as_hex_text(evidence: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(evidence).ok()?.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let is_hex = text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit());
    is_hex.then_some(text)
}

/// Bounds-checked little-endian cursor over a binary structure.
///
/// Every read names the field it is reading so truncation errors point
/// at the exact structure member.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], VerificationFailure> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                VerificationFailure::malformed(format!(
                    "truncated evidence reading {}: need {} bytes at offset {}, have {}",
                    field,
                    len,
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn take_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], VerificationFailure> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub fn skip(&mut self, len: usize, field: &str) -> Result<(), VerificationFailure> {
        self.take(len, field).map(|_| ())
    }

    pub fn u16_le(&mut self, field: &str) -> Result<u16, VerificationFailure> {
        Ok(u16::from_le_bytes(self.take_array(field)?))
    }

    pub fn u32_le(&mut self, field: &str) -> Result<u32, VerificationFailure> {
        Ok(u32::from_le_bytes(self.take_array(field)?))
    }

    pub fn u64_le(&mut self, field: &str) -> Result<u64, VerificationFailure> {
        Ok(u64::from_le_bytes(self.take_array(field)?))
    }
}
