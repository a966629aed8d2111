//! Typed access to well-known CAS message types.
//!
//! Execution workers deal in `Action`s, `Command`s and directory trees, not
//! raw blobs; this store layers those reads and writes over a [`BlobAccess`]
//! with a uniform message size bound.

use std::sync::Arc;

use bytes::Bytes;
use larch_blobstore::BlobAccess;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_buffer::Validation;
use larch_digest::Digest;

use crate::proto;

/// Reads and writes typed CAS objects.
pub struct CasStore {
    storage: Arc<dyn BlobAccess>,
    maximum_message_size_bytes: usize,
}

impl CasStore {
    pub fn new(storage: Arc<dyn BlobAccess>, maximum_message_size_bytes: usize) -> Self {
        Self {
            storage,
            maximum_message_size_bytes,
        }
    }

    async fn get_message<M: prost::Message + Default>(&self, digest: &Digest) -> Result<M> {
        if digest.size_bytes() as usize > self.maximum_message_size_bytes {
            return Err(StorageError::invalid_argument(format!(
                "refusing to decode message of size {}, which exceeds the maximum of {}",
                digest.size_bytes(),
                self.maximum_message_size_bytes
            )));
        }
        self.storage
            .get(digest)
            .await
            .into_proto(self.maximum_message_size_bytes)
            .await
    }

    pub async fn get_action(&self, digest: &Digest) -> Result<proto::Action> {
        self.get_message(digest).await
    }

    pub async fn get_command(&self, digest: &Digest) -> Result<proto::Command> {
        self.get_message(digest).await
    }

    pub async fn get_directory(&self, digest: &Digest) -> Result<proto::Directory> {
        self.get_message(digest).await
    }

    pub async fn get_tree(&self, digest: &Digest) -> Result<proto::Tree> {
        self.get_message(digest).await
    }

    /// Store raw bytes, deriving their digest with the parent's function.
    pub async fn put_blob(&self, data: Bytes, parent_digest: &Digest) -> Result<Digest> {
        let mut generator = parent_digest.new_generator();
        generator.update(&data);
        let digest = generator.sum();

        let buffer = Buffer::from_bytes(
            digest.clone(),
            Validation::FullIntegrity,
            data,
            BufferSource::user_provided(),
        );
        self.storage.put(&digest, buffer).await?;
        Ok(digest)
    }

    /// Store an encoded message, deriving its digest with the parent's
    /// function.
    pub async fn put_message<M: prost::Message>(&self, message: &M, parent_digest: &Digest) -> Result<Digest> {
        self.put_blob(Bytes::from(message.encode_to_vec()), parent_digest).await
    }
}

#[cfg(test)]
mod tests {
    use larch_blobstore::backends::MemoryBlobAccess;
    use larch_blobstore::StorageKind;
    use larch_buffer::ErrorCode;
    use larch_testing::cas_digest_for_instance;

    use super::*;

    fn store_over_memory() -> CasStore {
        CasStore::new(Arc::new(MemoryBlobAccess::new(StorageKind::Cas)), 1024)
    }

    fn parent() -> Digest {
        cas_digest_for_instance("main", b"parent")
    }

    #[tokio::test]
    async fn messages_round_trip_with_derived_digests() {
        let store = store_over_memory();
        let command = proto::Command {
            arguments: vec!["cc".to_string(), "-O2".to_string(), "main.c".to_string()],
        };

        let digest = store.put_message(&command, &parent()).await.unwrap();
        assert_eq!(digest.instance_name(), "main");
        assert_eq!(store.get_command(&digest).await.unwrap(), command);
    }

    #[tokio::test]
    async fn put_blob_digests_the_payload() {
        let store = store_over_memory();
        let digest = store.put_blob(Bytes::from_static(b"object file"), &parent()).await.unwrap();
        assert_eq!(digest, cas_digest_for_instance("main", b"object file"));
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected_before_reading() {
        let store = CasStore::new(Arc::new(MemoryBlobAccess::new(StorageKind::Cas)), 8);
        let too_big = cas_digest_for_instance("main", b"a message larger than eight bytes");
        let err = store.get_action(&too_big).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn tree_structures_survive_storage() {
        let store = store_over_memory();
        let leaf = proto::Directory {
            files: vec![proto::FileNode {
                name: "lib.o".to_string(),
                digest: Some(proto::Digest {
                    hash: "ab".repeat(32),
                    size_bytes: 128,
                }),
                is_executable: false,
            }],
            directories: vec![],
        };
        let tree = proto::Tree {
            root: Some(leaf.clone()),
            children: vec![leaf],
        };

        let digest = store.put_message(&tree, &parent()).await.unwrap();
        assert_eq!(store.get_tree(&digest).await.unwrap(), tree);
    }
}
