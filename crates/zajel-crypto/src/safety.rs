//! Safety numbers.
//!
//! A safety number is a 60-digit string both peers can compute from the
//! pair of identity public keys and compare out-of-band. The two keys are
//! sorted before hashing, so both sides produce the same number regardless
//! of who computes it.

use sha2::{Digest, Sha256};

/// Number of 5-digit groups in a safety number.
pub const SAFETY_GROUPS: usize = 12;

/// Compute the 60-digit safety number for a pair of public keys.
///
/// Sort the keys lexicographically, hash `sorted_a || sorted_b` with
/// SHA-256, then for each of the first 12 byte pairs take
/// `(byte[i] << 8 | byte[i+1]) mod 100000`, zero-padded to 5 digits.
pub fn compute_safety_number(key_a: &[u8; 32], key_b: &[u8; 32]) -> String {
    let (first, second) = if key_a <= key_b {
        (key_a, key_b)
    } else {
        (key_b, key_a)
    };

    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(SAFETY_GROUPS * 5);
    for i in 0..SAFETY_GROUPS {
        let hi = digest[2 * i] as u32;
        let lo = digest[2 * i + 1] as u32;
        let group = ((hi << 8) | lo) % 100_000;
        out.push_str(&format!("{group:05}"));
    }
    out
}

/// Format a safety number in 5-digit groups for display.
pub fn format_safety_number(number: &str) -> String {
    number
        .as_bytes()
        .chunks(5)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}
