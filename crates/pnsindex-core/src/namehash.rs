//! Keccak helpers and the hierarchical name-hash used to key domains.
//!
//! `namehash("")` is 32 zero bytes; `namehash("a.b")` is
//! `keccak256(namehash("b") ‖ keccak256("a"))`.

use tiny_keccak::{Hasher, Keccak};

/// keccak256 of `bytes`.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}

/// keccak256 of `bytes` as lowercase `0x…` hex.
pub fn keccak256_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(keccak256(bytes)))
}

/// Hash of a single label.
pub fn labelhash(label: &str) -> String {
    keccak256_hex(label.as_bytes())
}

/// Name-hash of a dot-separated name. Labels are lowercased first.
pub fn namehash(name: &str) -> String {
    let mut node = [0u8; 32];
    if !name.is_empty() {
        for label in name.rsplit('.') {
            let label_hash = keccak256(label.to_lowercase().as_bytes());
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&node);
            buf[32..].copy_from_slice(&label_hash);
            node = keccak256(&buf);
        }
    }
    format!("0x{}", hex::encode(node))
}

/// Normalises a 32-byte hash to lowercase `0x…` form. Returns `None` if the
/// input is not 64 hex digits.
pub fn normalize_hash(input: &str) -> Option<String> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("0x{}", digits.to_ascii_lowercase()))
    } else {
        None
    }
}
