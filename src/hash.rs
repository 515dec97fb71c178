//! Content hashing for blobs.
//!
//! Blob identity is a SHA-1 digest over a length-prefixed encoding of the
//! content, rendered as 40 lowercase hex characters.  The digest input is
//! `"blob " + decimal byte length + NUL + content`, so the total length
//! must be known before the first content byte is hashed — this is why
//! [`hash_from_stream`] takes a declared length up front.

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Number of hex characters in a content hash.
pub const HASH_LENGTH: usize = 40;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised while hashing streamed content.
#[derive(Debug, Error)]
pub enum HashError {
    /// The stream yielded a different byte count than declared.
    #[error("hashed stream was {actual} bytes but {declared} were declared")]
    LengthMismatch { declared: u64, actual: u64 },

    /// The underlying stream failed.
    #[error("failed to read stream while hashing")]
    Io(#[from] std::io::Error),
}

fn content_header(byte_length: u64) -> Vec<u8> {
    format!("blob {byte_length}\0").into_bytes()
}

/// Hash an in-memory string.
///
/// Agrees with [`hash_from_stream`] for the UTF-8 encoding of the same
/// content.
pub fn hash_from_string(content: &str) -> String {
    hash_from_bytes(content.as_bytes())
}

/// Hash an in-memory byte slice.
pub fn hash_from_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content_header(bytes.len() as u64));
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a stream of known total length.
///
/// Consumes the stream in bounded chunks (no whole-content buffering) and
/// fails if the stream errors or the observed length differs from
/// `byte_length` — the digest would be wrong either way.
pub async fn hash_from_stream<R>(byte_length: u64, mut stream: R) -> Result<String, HashError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut hasher = Sha1::new();
    hasher.update(content_header(byte_length));

    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut observed: u64 = 0;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        observed += n as u64;
        hasher.update(&buf[..n]);
    }

    if observed != byte_length {
        return Err(HashError::LengthMismatch {
            declared: byte_length,
            actual: observed,
        });
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check that `hash` is a well-formed content hash: exactly 40 lowercase
/// hexadecimal characters.  Case is the caller's responsibility; uppercase
/// digests are rejected, not canonicalized.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LENGTH && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Known digests for the length-prefixed SHA-1 scheme.
    const HELLO_WORLD_HASH: &str = "5e1c309dae7f45e0f39b1bf3ac3cd9db12e7d689";
    const STRING_A_HASH: &str = "2e65efe2a145dda7ee51d1741299f848e5bf752e";
    const STRING_AB_HASH: &str = "9ae9e86b7bd6cb1472d9373702d8249973da0832";

    #[test]
    fn test_hash_from_string_known_digests() {
        assert_eq!(hash_from_string("Hello World"), HELLO_WORLD_HASH);
        assert_eq!(hash_from_string("a"), STRING_A_HASH);
        assert_eq!(hash_from_string("ab"), STRING_AB_HASH);
    }

    #[test]
    fn test_hash_of_large_content() {
        let content = "a".repeat(1_000_000);
        assert_eq!(
            hash_from_string(&content),
            "de1fbf0c2f34f67f01f355f31ed0cf7319643c5e"
        );
    }

    #[tokio::test]
    async fn test_stream_agrees_with_string() {
        let content = "Hello World";
        let hash = hash_from_stream(content.len() as u64, content.as_bytes())
            .await
            .unwrap();
        assert_eq!(hash, HELLO_WORLD_HASH);
    }

    #[tokio::test]
    async fn test_stream_length_mismatch() {
        let content = b"Hello World";
        let err = hash_from_stream(5, &content[..]).await.unwrap_err();
        match err {
            HashError::LengthMismatch { declared, actual } => {
                assert_eq!(declared, 5);
                assert_eq!(actual, 11);
            }
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_is_valid_hash() {
        assert!(is_valid_hash(HELLO_WORLD_HASH));
        assert!(!is_valid_hash(""));
        assert!(!is_valid_hash("5e1c309d"));
        assert!(!is_valid_hash(&HELLO_WORLD_HASH.to_uppercase()));
        assert!(!is_valid_hash("zz1c309dae7f45e0f39b1bf3ac3cd9db12e7d689"));
    }
}
