//! The [`Digest`] type and its validation rules.

use snafu::Snafu;

use crate::generator::DigestGenerator;

/// Errors produced while constructing a [`Digest`].
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum DigestError {
    /// The hash length does not correspond to a supported digest function.
    #[snafu(display("hash has length {length}, which is not a supported digest function"))]
    InvalidHashLength {
        /// Length of the rejected hash in bytes.
        length: usize,
    },

    /// The hash is not a well-formed lowercase hexadecimal string.
    #[snafu(display("hash '{hash}' is not a valid hexadecimal string"))]
    InvalidHashEncoding {
        /// The rejected hash string.
        hash: String,
    },

    /// Blob sizes are signed on the wire but may never be negative.
    #[snafu(display("size {size_bytes} is negative"))]
    NegativeSize {
        /// The rejected size.
        size_bytes: i64,
    },
}

/// Digest functions admitted by the Remote Execution API.
///
/// The function is never stored explicitly; it is recovered from the hash
/// length, which is unambiguous across the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestFunction {
    /// Select the digest function from a hash length in bytes.
    pub fn from_hash_length(length: usize) -> Result<Self, DigestError> {
        match length {
            16 => Ok(DigestFunction::Md5),
            20 => Ok(DigestFunction::Sha1),
            32 => Ok(DigestFunction::Sha256),
            48 => Ok(DigestFunction::Sha384),
            64 => Ok(DigestFunction::Sha512),
            _ => Err(DigestError::InvalidHashLength { length }),
        }
    }

    /// Length of hashes produced by this function, in bytes.
    pub fn hash_length(&self) -> usize {
        match self {
            DigestFunction::Md5 => 16,
            DigestFunction::Sha1 => 20,
            DigestFunction::Sha256 => 32,
            DigestFunction::Sha384 => 48,
            DigestFunction::Sha512 => 64,
        }
    }
}

/// Identity of a blob: instance name, content hash and size.
///
/// Digests are immutable after construction and cheap to clone. Ordering is
/// lexicographic over (instance, hash, size), which gives [`crate::DigestSet`]
/// its deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    instance_name: String,
    hash: Vec<u8>,
    size_bytes: i64,
}

impl Digest {
    /// Create a digest from raw hash bytes.
    ///
    /// Validates that the hash length selects a digest function and that the
    /// size is non-negative.
    pub fn new(instance_name: impl Into<String>, hash: Vec<u8>, size_bytes: i64) -> Result<Self, DigestError> {
        DigestFunction::from_hash_length(hash.len())?;
        if size_bytes < 0 {
            return Err(DigestError::NegativeSize { size_bytes });
        }
        Ok(Self {
            instance_name: instance_name.into(),
            hash,
            size_bytes,
        })
    }

    /// Create a digest from a hexadecimal hash string, as carried on the wire.
    pub fn from_hex(instance_name: impl Into<String>, hash_hex: &str, size_bytes: i64) -> Result<Self, DigestError> {
        let hash = hex::decode(hash_hex).map_err(|_| DigestError::InvalidHashEncoding {
            hash: hash_hex.to_string(),
        })?;
        Self::new(instance_name, hash, size_bytes)
    }

    /// The instance name this blob was addressed under.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The raw content hash.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// The content hash as lowercase hexadecimal.
    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    /// The size of the blob in bytes.
    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    /// The digest function that produced the hash.
    pub fn function(&self) -> DigestFunction {
        // Length was validated at construction.
        match DigestFunction::from_hash_length(self.hash.len()) {
            Ok(function) => function,
            Err(_) => unreachable!("digest constructed with unsupported hash length"),
        }
    }

    /// The (hash, size) projection used on the wire, with the instance
    /// stripped.
    pub fn to_partial(&self) -> (String, i64) {
        (self.hash_hex(), self.size_bytes)
    }

    /// The same digest with a different declared size.
    ///
    /// Backends that index payload lengths themselves (action-cache entries)
    /// use this to declare the stored length on buffers they serve.
    pub fn with_size_bytes(&self, size_bytes: i64) -> Digest {
        Digest {
            instance_name: self.instance_name.clone(),
            hash: self.hash.clone(),
            size_bytes: size_bytes.max(0),
        }
    }

    /// A fresh generator using the same digest function and instance name.
    ///
    /// Used when deriving the digest of a blob that will live next to this
    /// one, e.g. the members of a directory tree.
    pub fn new_generator(&self) -> DigestGenerator {
        DigestGenerator::new(self.instance_name.clone(), self.function())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}-{}", self.instance_name, self.hash_hex(), self.size_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn new_accepts_supported_hash_lengths() {
        for length in [16, 20, 32, 48, 64] {
            let digest = Digest::new("main", vec![0x42; length], 7).unwrap();
            assert_eq!(digest.hash().len(), length);
        }
    }

    #[test]
    fn new_rejects_unsupported_hash_length() {
        let err = Digest::new("main", vec![0x42; 31], 7).unwrap_err();
        assert_eq!(err, DigestError::InvalidHashLength { length: 31 });
    }

    #[test]
    fn new_rejects_negative_size() {
        let err = Digest::new("main", vec![0x42; 32], -1).unwrap_err();
        assert_eq!(err, DigestError::NegativeSize { size_bytes: -1 });
    }

    #[test]
    fn from_hex_round_trips() {
        let digest = Digest::from_hex("main", HELLO_SHA256, 5).unwrap();
        assert_eq!(digest.hash_hex(), HELLO_SHA256);
        assert_eq!(digest.size_bytes(), 5);
        assert_eq!(digest.instance_name(), "main");
        assert_eq!(digest.function(), DigestFunction::Sha256);
    }

    #[test]
    fn from_hex_rejects_bad_encoding() {
        let err = Digest::from_hex("main", "not hex at all", 5).unwrap_err();
        assert!(matches!(err, DigestError::InvalidHashEncoding { .. }));
    }

    #[test]
    fn to_partial_strips_instance() {
        let digest = Digest::from_hex("main", HELLO_SHA256, 5).unwrap();
        assert_eq!(digest.to_partial(), (HELLO_SHA256.to_string(), 5));
    }

    #[test]
    fn display_includes_all_components() {
        let digest = Digest::from_hex("main", HELLO_SHA256, 5).unwrap();
        assert_eq!(digest.to_string(), format!("main/{}-5", HELLO_SHA256));
    }
}
