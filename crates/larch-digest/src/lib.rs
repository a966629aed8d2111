//! Blob identity for the Larch storage plane.
//!
//! Every object in the storage plane is addressed by a [`Digest`]: the
//! instance name it was uploaded under, the cryptographic hash of its
//! contents and its size in bytes. The hash length selects the digest
//! function, matching the functions admitted by the Remote Execution API
//! (MD5, SHA-1, SHA-256, SHA-384, SHA-512).
//!
//! # Components
//!
//! - [`Digest`]: immutable identity of a single blob
//! - [`DigestGenerator`]: stateful hasher producing a [`Digest`]
//! - [`DigestSet`] / [`DigestSetBuilder`]: unordered digest collections with
//!   deterministic iteration order
//!
//! # Example
//!
//! ```
//! use larch_digest::Digest;
//!
//! let digest = Digest::from_hex(
//!     "main",
//!     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
//!     5,
//! )
//! .unwrap();
//! assert_eq!(digest.size_bytes(), 5);
//!
//! let mut generator = digest.new_generator();
//! generator.update(b"hello");
//! assert_eq!(generator.sum(), digest);
//! ```

mod digest;
mod generator;
mod set;

pub use digest::Digest;
pub use digest::DigestError;
pub use digest::DigestFunction;
pub use generator::DigestGenerator;
pub use set::DigestSet;
pub use set::DigestSetBuilder;
