//! Stateful digest computation.

use md5::Digest as _;
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;
use sha2::Sha384;
use sha2::Sha512;

use crate::digest::Digest;
use crate::digest::DigestFunction;

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(function: DigestFunction) -> Self {
        match function {
            DigestFunction::Md5 => Hasher::Md5(Md5::new()),
            DigestFunction::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestFunction::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestFunction::Sha384 => Hasher::Sha384(Sha384::new()),
            DigestFunction::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Incrementally hashes a byte stream into a [`Digest`].
///
/// Obtained through [`Digest::new_generator`] so that derived digests use the
/// same function and instance name as their parent.
pub struct DigestGenerator {
    instance_name: String,
    hasher: Hasher,
    size_bytes: i64,
}

impl DigestGenerator {
    pub(crate) fn new(instance_name: String, function: DigestFunction) -> Self {
        Self {
            instance_name,
            hasher: Hasher::new(function),
            size_bytes: 0,
        }
    }

    /// Feed a chunk of data into the hash state.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size_bytes += data.len() as i64;
    }

    /// Finish hashing and produce the digest of everything written so far.
    pub fn sum(self) -> Digest {
        let hash = self.hasher.finalize();
        // The hash length comes from a supported function and the size is a
        // sum of buffer lengths, so construction cannot fail.
        match Digest::new(self.instance_name, hash, self.size_bytes) {
            Ok(digest) => digest,
            Err(_) => unreachable!("generator produced an invalid digest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(function_hex: &str, size: i64) -> Digest {
        Digest::from_hex("main", function_hex, size).unwrap()
    }

    #[test]
    fn sha256_matches_known_vector() {
        let parent = parent("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", 5);
        let mut generator = parent.new_generator();
        generator.update(b"hello");
        assert_eq!(generator.sum(), parent);
    }

    #[test]
    fn incremental_updates_match_single_update() {
        let parent = parent("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", 5);

        let mut one = parent.new_generator();
        one.update(b"hello world");

        let mut two = parent.new_generator();
        two.update(b"hello");
        two.update(b" ");
        two.update(b"world");

        assert_eq!(one.sum(), two.sum());
    }

    #[test]
    fn md5_function_is_preserved() {
        let parent = Digest::new("main", vec![0u8; 16], 0).unwrap();
        let mut generator = parent.new_generator();
        generator.update(b"abc");
        let derived = generator.sum();
        assert_eq!(derived.function(), DigestFunction::Md5);
        assert_eq!(derived.hash_hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(derived.size_bytes(), 3);
    }

    #[test]
    fn empty_input_has_zero_size() {
        let parent = parent("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", 5);
        let derived = parent.new_generator().sum();
        assert_eq!(derived.size_bytes(), 0);
        assert_eq!(
            derived.hash_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
