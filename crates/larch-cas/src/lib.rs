//! Remote Execution API front-ends for the Larch storage plane.
//!
//! The gRPC transport itself is external; this crate holds the request
//! handlers it delegates to, expressed over prost message structs:
//!
//! - [`ContentAddressableStorageService`]: `FindMissingBlobs`,
//!   `BatchUpdateBlobs` (per-element status), `BatchReadBlobs` and
//!   `GetTree` (both unimplemented here).
//! - [`ActionCacheService`]: `GetActionResult` / `UpdateActionResult`.
//! - [`CasStore`]: typed reads and writes of `Action` / `Command` /
//!   `Directory` / `Tree` messages for execution workers.
//!
//! Both services take the root of an assembled
//! [`BlobAccess`](larch_blobstore::BlobAccess) tree; everything about where
//! blobs physically live is decided there.

pub mod proto;

mod ac_service;
mod cas_service;
mod cas_store;

pub use ac_service::ActionCacheService;
pub use cas_service::ContentAddressableStorageService;
pub use cas_store::CasStore;
