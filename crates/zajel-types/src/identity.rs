//! Stable identities.
//!
//! A [`StableId`] is 64 random bits generated once per device and persisted
//! in plain preferences so it survives secure-storage corruption. It is
//! independent of the encryption keys, which lets trust survive key rotation.
//!
//! The id has four textual forms:
//! - 16 lowercase hex characters (canonical, used on the wire)
//! - a 4-character tag (first 4 hex chars, shown as `Username#TAG`)
//! - an 11-character base58 string (compact pairing links)
//! - a 6-word mnemonic over the BIP39 English wordlist (human backup)

use bip39::Language;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// Number of words in the mnemonic form. Six 11-bit words cover 66 bits;
/// the top two bits are always zero padding.
pub const MNEMONIC_WORDS: usize = 6;

/// A 64-bit stable peer identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId([u8; 8]);

impl StableId {
    /// Generate a fresh random stable id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0
    }

    /// Canonical 16-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the canonical hex form. Accepts upper or lower case.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s.trim())
            .map_err(|e| TypesError::InvalidEncoding(format!("stable id hex: {e}")))?;
        let bytes: [u8; 8] = decoded
            .try_into()
            .map_err(|_| TypesError::InvalidEncoding("stable id must be 8 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// The 4-character tag (first 4 hex chars).
    pub fn tag(&self) -> String {
        self.to_hex().chars().take(4).collect()
    }

    /// Compact base58 form (11 characters for 8 bytes).
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Parse the base58 form.
    pub fn from_base58(s: &str) -> Result<Self> {
        let decoded = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| TypesError::InvalidEncoding(format!("stable id base58: {e}")))?;
        let bytes: [u8; 8] = decoded
            .try_into()
            .map_err(|_| TypesError::InvalidEncoding("stable id must be 8 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Encode as a 6-word mnemonic over the BIP39 English wordlist.
    ///
    /// The 64-bit id is left-padded to 66 bits and split into six 11-bit
    /// indices, most significant group first.
    pub fn to_mnemonic(&self) -> String {
        let list = Language::English.word_list();
        let value = u64::from_be_bytes(self.0) as u128;
        let mut words = Vec::with_capacity(MNEMONIC_WORDS);
        for i in (0..MNEMONIC_WORDS).rev() {
            let index = ((value >> (11 * i)) & 0x7FF) as usize;
            words.push(list[index]);
        }
        words.join(" ")
    }

    /// Decode the 6-word mnemonic form.
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let list = Language::English.word_list();
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() != MNEMONIC_WORDS {
            return Err(TypesError::InvalidEncoding(format!(
                "mnemonic must have {} words, got {}",
                MNEMONIC_WORDS,
                words.len()
            )));
        }

        let mut value: u128 = 0;
        for word in &words {
            let lowered = word.to_lowercase();
            let index = list
                .iter()
                .position(|w| *w == lowered)
                .ok_or_else(|| TypesError::InvalidEncoding(format!("unknown word: {word}")))?;
            value = (value << 11) | index as u128;
        }

        if value > u64::MAX as u128 {
            return Err(TypesError::InvalidEncoding(
                "mnemonic encodes more than 64 bits".into(),
            ));
        }

        Ok(Self((value as u64).to_be_bytes()))
    }
}

impl std::fmt::Display for StableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Format a display identity as `Username#TAG`.
pub fn display_identity(username: &str, id: &StableId) -> String {
    format!("{}#{}", username, id.tag().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = StableId::random();
        let restored = StableId::from_hex(&id.to_hex()).expect("parse");
        assert_eq!(id, restored);
    }

    #[test]
    fn test_hex_case_insensitive() {
        let id = StableId::from_bytes([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0x07, 0x18]);
        let upper = id.to_hex().to_uppercase();
        assert_eq!(StableId::from_hex(&upper).expect("parse"), id);
    }

    #[test]
    fn test_hex_wrong_length_rejected() {
        assert!(StableId::from_hex("a1b2").is_err());
        assert!(StableId::from_hex("a1b2c3d4e5f6071822").is_err());
        assert!(StableId::from_hex("not hex at all!!").is_err());
    }

    #[test]
    fn test_tag() {
        let id = StableId::from_bytes([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6, 0x07, 0x18]);
        assert_eq!(id.tag(), "a1b2");
    }

    #[test]
    fn test_display_identity() {
        let id = StableId::from_bytes([0xA1, 0xB2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(display_identity("alice", &id), "alice#A1B2");
    }

    #[test]
    fn test_base58_roundtrip() {
        let id = StableId::random();
        let encoded = id.to_base58();
        assert!(encoded.len() <= 11);
        assert_eq!(StableId::from_base58(&encoded).expect("parse"), id);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        for _ in 0..16 {
            let id = StableId::random();
            let phrase = id.to_mnemonic();
            assert_eq!(phrase.split_whitespace().count(), MNEMONIC_WORDS);
            assert_eq!(StableId::from_mnemonic(&phrase).expect("parse"), id);
        }
    }

    #[test]
    fn test_mnemonic_all_zero() {
        let id = StableId::from_bytes([0u8; 8]);
        let phrase = id.to_mnemonic();
        assert_eq!(phrase, "abandon abandon abandon abandon abandon abandon");
        assert_eq!(StableId::from_mnemonic(&phrase).expect("parse"), id);
    }

    #[test]
    fn test_mnemonic_all_ones() {
        let id = StableId::from_bytes([0xFF; 8]);
        let phrase = id.to_mnemonic();
        assert_eq!(StableId::from_mnemonic(&phrase).expect("parse"), id);
    }

    #[test]
    fn test_mnemonic_wrong_word_count() {
        assert!(StableId::from_mnemonic("abandon abandon").is_err());
    }

    #[test]
    fn test_mnemonic_unknown_word() {
        assert!(StableId::from_mnemonic("abandon abandon abandon abandon abandon zzzzzz").is_err());
    }

    #[test]
    fn test_mnemonic_case_and_whitespace_tolerant() {
        let id = StableId::random();
        let phrase = id.to_mnemonic().to_uppercase().replace(' ', "  ");
        assert_eq!(StableId::from_mnemonic(&phrase).expect("parse"), id);
    }
}
