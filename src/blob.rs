//! Blob metadata model.
//!
//! A [`Blob`] describes one immutable content-addressed object: its hash,
//! exact byte length, and — when the content is editable text — its UTF-16
//! code-unit length.  The string length is decided once, at upload time,
//! by [`eligible_string_length`]; a failed eligibility check means "store
//! as binary", never an error.

use serde::{Deserialize, Serialize};

/// Metadata for one immutable content-addressed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    hash: String,
    byte_length: u64,
    string_length: Option<u64>,
}

impl Blob {
    pub fn new(hash: String, byte_length: u64, string_length: Option<u64>) -> Self {
        Self {
            hash,
            byte_length,
            string_length,
        }
    }

    /// The 40-hex-character content hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Exact size of the underlying content in bytes.
    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    /// UTF-16 code-unit length, present only for editable text content.
    pub fn string_length(&self) -> Option<u64> {
        self.string_length
    }
}

/// Bounds for deciding whether content counts as editable text.
///
/// Both values are deployment configuration, not constants; see
/// `blob_store` in the YAML config.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityBounds {
    /// Content larger than this many bytes is never treated as text.
    pub max_editable_byte_length: u64,
    /// Upper bound on the UTF-16 code-unit length of editable text.
    pub max_string_length: u64,
}

/// Compute the string length of `bytes`, or `None` if the content is not
/// editable text.
///
/// Content qualifies when it is within the byte-size bound, valid UTF-8,
/// free of NUL bytes and characters outside the Basic Multilingual Plane,
/// and within the string-length bound.  Every character of BMP text is one
/// UTF-16 code unit, so the string length equals the character count.
pub fn eligible_string_length(bytes: &[u8], bounds: &EligibilityBounds) -> Option<u64> {
    if bytes.len() as u64 > bounds.max_editable_byte_length {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let mut units: u64 = 0;
    for ch in text.chars() {
        if ch == '\0' || ch > '\u{ffff}' {
            return None;
        }
        units += 1;
    }
    if units > bounds.max_string_length {
        return None;
    }
    Some(units)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> EligibilityBounds {
        EligibilityBounds {
            max_editable_byte_length: 64,
            max_string_length: 16,
        }
    }

    #[test]
    fn test_plain_ascii_is_editable() {
        assert_eq!(eligible_string_length(b"Hello World", &bounds()), Some(11));
    }

    #[test]
    fn test_multibyte_bmp_text_counts_characters() {
        // "Olá" is 4 bytes but 3 UTF-16 code units.
        assert_eq!(eligible_string_length("Olá".as_bytes(), &bounds()), Some(3));
    }

    #[test]
    fn test_invalid_utf8_is_binary() {
        assert_eq!(eligible_string_length(&[0xff, 0xfe, 0x01], &bounds()), None);
    }

    #[test]
    fn test_nul_byte_is_binary() {
        assert_eq!(eligible_string_length(b"a\0b", &bounds()), None);
    }

    #[test]
    fn test_non_bmp_character_is_binary() {
        assert_eq!(eligible_string_length("a😀b".as_bytes(), &bounds()), None);
    }

    #[test]
    fn test_over_byte_bound_is_binary() {
        let content = "a".repeat(65);
        assert_eq!(eligible_string_length(content.as_bytes(), &bounds()), None);
    }

    #[test]
    fn test_over_string_bound_is_binary() {
        let content = "a".repeat(17);
        assert_eq!(eligible_string_length(content.as_bytes(), &bounds()), None);
    }

    #[test]
    fn test_empty_content_is_editable() {
        assert_eq!(eligible_string_length(b"", &bounds()), Some(0));
    }
}
