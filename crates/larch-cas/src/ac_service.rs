//! The ActionCache front-end.

use std::sync::Arc;

use larch_blobstore::BlobAccess;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_buffer::Validation;
use tracing::instrument;

use crate::proto;

/// Serves the `ActionCache` RPCs over an action-cache [`BlobAccess`].
///
/// Action results are opaque payloads keyed by action digest; the message
/// size bound guards decoding against hostile or corrupt size fields.
pub struct ActionCacheService {
    storage: Arc<dyn BlobAccess>,
    maximum_message_size_bytes: usize,
}

impl ActionCacheService {
    pub fn new(storage: Arc<dyn BlobAccess>, maximum_message_size_bytes: usize) -> Self {
        Self {
            storage,
            maximum_message_size_bytes,
        }
    }

    #[instrument(skip_all, fields(instance = %request.instance_name))]
    pub async fn get_action_result(&self, request: proto::GetActionResultRequest) -> Result<proto::ActionResult> {
        let action_digest = request
            .action_digest
            .as_ref()
            .ok_or_else(|| StorageError::invalid_argument("request has no action digest"))?
            .to_storage(&request.instance_name)?;
        self.storage
            .get(&action_digest)
            .await
            .into_proto(self.maximum_message_size_bytes)
            .await
    }

    #[instrument(skip_all, fields(instance = %request.instance_name))]
    pub async fn update_action_result(&self, request: proto::UpdateActionResultRequest) -> Result<proto::ActionResult> {
        let action_digest = request
            .action_digest
            .as_ref()
            .ok_or_else(|| StorageError::invalid_argument("request has no action digest"))?
            .to_storage(&request.instance_name)?;
        let action_result = request
            .action_result
            .ok_or_else(|| StorageError::invalid_argument("request has no action result"))?;

        // The payload length has no relation to the action digest's size
        // field; the buffer declares the encoded length so size validation
        // checks stream completeness.
        let encoded = prost::Message::encode_to_vec(&action_result);
        let buffer = Buffer::from_bytes(
            action_digest.with_size_bytes(encoded.len() as i64),
            Validation::SizeOnly,
            encoded.into(),
            BufferSource::user_provided(),
        );
        self.storage.put(&action_digest, buffer).await?;
        Ok(action_result)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use larch_blobstore::backends::MemoryBlobAccess;
    use larch_blobstore::StorageKind;
    use larch_buffer::ErrorCode;
    use larch_testing::ac_digest;

    use super::*;

    fn service_over_memory() -> ActionCacheService {
        ActionCacheService::new(Arc::new(MemoryBlobAccess::new(StorageKind::Ac)), 4 * 1024 * 1024)
    }

    fn sample_result() -> proto::ActionResult {
        proto::ActionResult {
            exit_code: 0,
            stdout_raw: Bytes::from_static(b"ok\n"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let service = service_over_memory();
        let action_digest = proto::Digest::from_storage(&ac_digest("main", 0x42, 140));

        let stored = service
            .update_action_result(proto::UpdateActionResultRequest {
                instance_name: "main".to_string(),
                action_digest: Some(action_digest.clone()),
                action_result: Some(sample_result()),
            })
            .await
            .unwrap();
        assert_eq!(stored, sample_result());

        let fetched = service
            .get_action_result(proto::GetActionResultRequest {
                instance_name: "main".to_string(),
                action_digest: Some(action_digest),
            })
            .await
            .unwrap();
        assert_eq!(fetched, sample_result());
    }

    #[tokio::test]
    async fn uncached_actions_read_as_not_found() {
        let service = service_over_memory();
        let err = service
            .get_action_result(proto::GetActionResultRequest {
                instance_name: "main".to_string(),
                action_digest: Some(proto::Digest::from_storage(&ac_digest("main", 0x99, 140))),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let service = service_over_memory();
        let digest = proto::Digest::from_storage(&ac_digest("ci", 0x42, 140));

        service
            .update_action_result(proto::UpdateActionResultRequest {
                instance_name: "ci".to_string(),
                action_digest: Some(digest.clone()),
                action_result: Some(sample_result()),
            })
            .await
            .unwrap();

        // The same action digest under another instance misses.
        let err = service
            .get_action_result(proto::GetActionResultRequest {
                instance_name: "dev".to_string(),
                action_digest: Some(digest),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
