//! Digest-validating blob streams for the Larch storage plane.
//!
//! Backends and decorators exchange blob contents as [`Buffer`]s: one-shot
//! streams tagged with the digest they claim to represent. The buffer is the
//! place where integrity is enforced: contents are hashed while they are
//! consumed and checked against the declared digest, and corruption fires a
//! repair hook that deletes the offending entry from its origin backend.
//!
//! # Architecture
//!
//! ```text
//! BlobAccess::get ----> Buffer (lazy)
//!                         |
//!       +-----------------+--------------------+
//!       |                 |                    |
//!  into_bytes()    into_chunk_reader()   clone_stream()
//!  into_proto()    into_reader()         clone_copy()
//!       |                 |                    |
//!       +---- ValidatingReader (hash + size checks, repair hook) ----+
//! ```
//!
//! # Ownership
//!
//! Exactly one terminal operation consumes a buffer; this is enforced by
//! move semantics rather than a runtime flag. Splitting (`clone_stream`,
//! `clone_copy`) counts as the terminal operation of the parent and yields
//! two new single-consumer buffers sharing one at-most-once repair trigger.

mod buffer;
mod chunk_reader;
mod error;
mod source;
mod tee;

pub use buffer::Buffer;
pub use buffer::Validation;
pub use buffer::CLONE_STREAM_WINDOW_BYTES;
pub use chunk_reader::read_all;
pub use chunk_reader::BytesReader;
pub use chunk_reader::ChunkReader;
pub use chunk_reader::ErrorReader;
pub use error::ErrorCode;
pub use error::Result;
pub use error::StorageError;
pub use source::BufferSource;
pub use source::RepairFn;
pub use source::RepairFuture;
