//! Random word passphrases for transfer passwords.
//!
//! Each word encodes 11 bits drawn from the OS RNG, indexing the BIP-39
//! English list.

use bip39::Language;

use crate::error::WalletError;

/// Bits of entropy carried by one word.
pub const BITS_PER_WORD: usize = 11;

/// Upper bound on generated passphrase length.
pub const MAX_WORDS: usize = 64;

/// Map bytes to words, 11 bits at a time. Trailing bits that do not fill a
/// whole word are dropped.
pub fn bytes_to_passphrase(bytes: &[u8]) -> Vec<&'static str> {
    let list = Language::English.word_list();
    let mut words = Vec::with_capacity(bytes.len() * 8 / BITS_PER_WORD);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for byte in bytes {
        acc = (acc << 8) | u32::from(*byte);
        bits += 8;
        if bits >= BITS_PER_WORD {
            bits -= BITS_PER_WORD;
            let index = (acc >> bits) & 0x7ff;
            words.push(list[index as usize]);
            acc &= (1 << bits) - 1;
        }
    }
    words
}

/// Generate `words` random words.
pub fn generate_passphrase(words: usize) -> Result<Vec<&'static str>, WalletError> {
    use rand::RngCore;
    if words == 0 || words > MAX_WORDS {
        return Err(WalletError::InvalidAmount(format!(
            "passphrase length must be 1..={MAX_WORDS} words, got {words}"
        )));
    }
    let mut bytes = vec![0u8; (words * BITS_PER_WORD).div_ceil(8)];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let mut phrase = bytes_to_passphrase(&bytes);
    phrase.truncate(words);
    Ok(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bytes_are_first_word() {
        assert_eq!(bytes_to_passphrase(&[0, 0, 0]), vec!["abandon", "abandon"]);
    }

    #[test]
    fn all_ones_are_last_word() {
        assert_eq!(bytes_to_passphrase(&[0xff, 0xff, 0xff]), vec!["zoo", "zoo"]);
    }

    #[test]
    fn bit_packing_crosses_bytes() {
        // 00000000 001|00000 000010|00 -> indices 1 and 2
        let words = bytes_to_passphrase(&[0x00, 0x20, 0x08]);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], "ability");
        assert_eq!(words[1], "able");
    }

    #[test]
    fn generated_length_matches() {
        for n in [1, 6, 12, MAX_WORDS] {
            assert_eq!(generate_passphrase(n).unwrap().len(), n);
        }
    }

    #[test]
    fn bad_lengths_rejected() {
        assert!(generate_passphrase(0).is_err());
        assert!(generate_passphrase(MAX_WORDS + 1).is_err());
    }
}
