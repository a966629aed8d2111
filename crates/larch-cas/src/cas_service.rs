//! The ContentAddressableStorage front-end.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use larch_blobstore::BlobAccess;
use larch_buffer::Buffer;
use larch_buffer::BufferSource;
use larch_buffer::Result;
use larch_buffer::StorageError;
use larch_buffer::Validation;
use larch_digest::DigestSet;
use tracing::instrument;

use crate::proto;

/// Serves the `ContentAddressableStorage` RPCs over a [`BlobAccess`].
///
/// Transport plumbing lives elsewhere; these methods are the request
/// handlers a gRPC server delegates to.
pub struct ContentAddressableStorageService {
    storage: Arc<dyn BlobAccess>,
}

impl ContentAddressableStorageService {
    pub fn new(storage: Arc<dyn BlobAccess>) -> Self {
        Self { storage }
    }

    /// Which of the request's digests the storage plane cannot serve.
    #[instrument(skip_all, fields(instance = %request.instance_name, digests = request.blob_digests.len()))]
    pub async fn find_missing_blobs(
        &self,
        request: proto::FindMissingBlobsRequest,
    ) -> Result<proto::FindMissingBlobsResponse> {
        let mut digests = DigestSet::builder();
        for wire_digest in &request.blob_digests {
            digests.add(wire_digest.to_storage(&request.instance_name)?);
        }
        let missing = self.storage.find_missing(digests.build()).await?;
        Ok(proto::FindMissingBlobsResponse {
            missing_blob_digests: missing.iter().map(proto::Digest::from_storage).collect(),
        })
    }

    /// Store every request element, reporting per-element status.
    ///
    /// The RPC itself succeeds even when individual uploads fail, so a
    /// partially successful batch is observable element by element. Elements
    /// are stored concurrently; the fan-out is bounded by the request size,
    /// which the transport's message limit bounds upstream.
    #[instrument(skip_all, fields(instance = %request.instance_name, blobs = request.requests.len()))]
    pub async fn batch_update_blobs(
        &self,
        request: proto::BatchUpdateBlobsRequest,
    ) -> Result<proto::BatchUpdateBlobsResponse> {
        let instance_name = &request.instance_name;
        let mut uploads: FuturesUnordered<_> = request
            .requests
            .into_iter()
            .map(|entry| async move {
                let status = match self.store_entry(instance_name, &entry).await {
                    Ok(()) => proto::Status::ok(),
                    Err(e) => proto::Status::from_error(&e),
                };
                proto::BatchUpdateBlobsResponseEntry {
                    digest: entry.digest,
                    status: Some(status),
                }
            })
            .collect();

        let mut responses = Vec::with_capacity(uploads.len());
        while let Some(response) = uploads.next().await {
            responses.push(response);
        }
        Ok(proto::BatchUpdateBlobsResponse { responses })
    }

    async fn store_entry(&self, instance_name: &str, entry: &proto::BatchUpdateBlobsRequestEntry) -> Result<()> {
        let wire_digest = entry
            .digest
            .as_ref()
            .ok_or_else(|| StorageError::invalid_argument("request element has no digest"))?;
        let digest = wire_digest.to_storage(instance_name)?;
        let buffer = Buffer::from_bytes(
            digest.clone(),
            Validation::FullIntegrity,
            entry.data.clone(),
            BufferSource::user_provided(),
        );
        self.storage.put(&digest, buffer).await
    }

    pub async fn batch_read_blobs(&self, _request: proto::BatchReadBlobsRequest) -> Result<proto::BatchReadBlobsResponse> {
        Err(StorageError::unimplemented(
            "this service does not support batched reading of blobs",
        ))
    }

    pub async fn get_tree(&self, _request: proto::GetTreeRequest) -> Result<proto::GetTreeResponse> {
        Err(StorageError::unimplemented(
            "this service does not support downloading directory trees",
        ))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use larch_blobstore::backends::MemoryBlobAccess;
    use larch_blobstore::StorageKind;
    use larch_buffer::ErrorCode;
    use larch_testing::cas_digest_for_instance;

    use super::*;

    fn service_over_memory() -> (ContentAddressableStorageService, Arc<MemoryBlobAccess>) {
        let storage = Arc::new(MemoryBlobAccess::new(StorageKind::Cas));
        (ContentAddressableStorageService::new(Arc::clone(&storage) as _), storage)
    }

    fn wire_digest_of(instance: &str, data: &[u8]) -> proto::Digest {
        proto::Digest::from_storage(&cas_digest_for_instance(instance, data))
    }

    #[tokio::test]
    async fn find_missing_blobs_projects_partial_digests() {
        let (service, storage) = service_over_memory();
        let present = cas_digest_for_instance("main", b"present");
        storage
            .put(
                &present,
                Buffer::from_bytes(
                    present.clone(),
                    Validation::FullIntegrity,
                    Bytes::from_static(b"present"),
                    BufferSource::user_provided(),
                ),
            )
            .await
            .unwrap();

        let response = service
            .find_missing_blobs(proto::FindMissingBlobsRequest {
                instance_name: "main".to_string(),
                blob_digests: vec![wire_digest_of("main", b"present"), wire_digest_of("main", b"absent")],
            })
            .await
            .unwrap();

        assert_eq!(response.missing_blob_digests, vec![wire_digest_of("main", b"absent")]);
    }

    #[tokio::test]
    async fn batch_update_reports_per_element_status() {
        let (service, storage) = service_over_memory();

        let good = wire_digest_of("main", b"good blob");
        // The digest claims different contents than the payload carries.
        let corrupt = wire_digest_of("main", b"clean contents");

        let response = service
            .batch_update_blobs(proto::BatchUpdateBlobsRequest {
                instance_name: "main".to_string(),
                requests: vec![
                    proto::BatchUpdateBlobsRequestEntry {
                        digest: Some(good.clone()),
                        data: Bytes::from_static(b"good blob"),
                    },
                    proto::BatchUpdateBlobsRequestEntry {
                        digest: Some(corrupt.clone()),
                        data: Bytes::from_static(b"tampered contents"),
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(response.responses.len(), 2);
        for entry in &response.responses {
            let status = entry.status.as_ref().unwrap();
            if entry.digest == Some(good.clone()) {
                assert_eq!(status.code, 0);
            } else {
                assert_eq!(status.code, ErrorCode::Internal.grpc_code());
            }
        }

        // The good blob is stored; the corrupt one is not.
        let stored = cas_digest_for_instance("main", b"good blob");
        assert!(storage.get(&stored).await.as_error().is_none());
    }

    #[tokio::test]
    async fn batch_update_flags_malformed_digests() {
        let (service, _) = service_over_memory();
        let response = service
            .batch_update_blobs(proto::BatchUpdateBlobsRequest {
                instance_name: "main".to_string(),
                requests: vec![proto::BatchUpdateBlobsRequestEntry {
                    digest: Some(proto::Digest {
                        hash: "not-hex".to_string(),
                        size_bytes: 4,
                    }),
                    data: Bytes::from_static(b"data"),
                }],
            })
            .await
            .unwrap();
        assert_eq!(
            response.responses[0].status.as_ref().unwrap().code,
            ErrorCode::InvalidArgument.grpc_code()
        );
    }

    #[tokio::test]
    async fn unsupported_rpcs_are_unimplemented() {
        let (service, _) = service_over_memory();
        let err = service
            .batch_read_blobs(proto::BatchReadBlobsRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);

        let err = service.get_tree(proto::GetTreeRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }
}
