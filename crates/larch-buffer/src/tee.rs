//! Bounded tee used by `clone_stream`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::chunk_reader::ChunkReader;
use crate::error::Result;
use crate::error::StorageError;

struct SideState {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    failed: Option<StorageError>,
}

impl SideState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued_bytes: 0,
            failed: None,
        }
    }

    fn fail(&mut self, error: StorageError) {
        self.failed = Some(error);
        self.queue.clear();
        self.queued_bytes = 0;
    }
}

struct TeeShared {
    // None once the source has reached end of stream or failed.
    source: Option<Box<dyn ChunkReader>>,
    sides: [SideState; 2],
    window_bytes: usize,
}

/// One consumable half of a split stream.
///
/// Whichever side reads first pulls from the source and leaves a copy of the
/// chunk queued for its sibling. A sibling lagging more than the window is
/// failed with `ResourceExhausted` and its queue is dropped, so the faster
/// consumer is never throttled and memory use stays bounded.
pub(crate) struct TeeSide {
    shared: Arc<Mutex<TeeShared>>,
    index: usize,
}

pub(crate) fn tee_reader(source: Box<dyn ChunkReader>, window_bytes: usize) -> (TeeSide, TeeSide) {
    let shared = Arc::new(Mutex::new(TeeShared {
        source: Some(source),
        sides: [SideState::new(), SideState::new()],
        window_bytes,
    }));
    (
        TeeSide {
            shared: Arc::clone(&shared),
            index: 0,
        },
        TeeSide { shared, index: 1 },
    )
}

#[async_trait]
impl ChunkReader for TeeSide {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut shared = self.shared.lock().await;
        let me = self.index;
        let sibling = 1 - self.index;

        if let Some(chunk) = shared.sides[me].queue.pop_front() {
            shared.sides[me].queued_bytes -= chunk.len();
            return Ok(Some(chunk));
        }
        if let Some(error) = &shared.sides[me].failed {
            return Err(error.clone());
        }

        let Some(source) = shared.source.as_mut() else {
            return Ok(None);
        };
        match source.read_chunk().await {
            Ok(Some(chunk)) => {
                if shared.sides[sibling].failed.is_none() {
                    if shared.sides[sibling].queued_bytes + chunk.len() > shared.window_bytes {
                        let window_bytes = shared.window_bytes;
                        shared.sides[sibling].fail(StorageError::resource_exhausted(format!(
                            "cloned stream fell more than {window_bytes} bytes behind its sibling"
                        )));
                    } else {
                        shared.sides[sibling].queue.push_back(chunk.clone());
                        shared.sides[sibling].queued_bytes += chunk.len();
                    }
                }
                Ok(Some(chunk))
            }
            Ok(None) => {
                shared.source = None;
                Ok(None)
            }
            Err(error) => {
                // The sibling can still drain its queue, but sees the same
                // error once it catches up to this point in the stream.
                shared.source = None;
                if shared.sides[sibling].failed.is_none() {
                    shared.sides[sibling].failed = Some(error.clone());
                }
                shared.sides[me].failed = Some(error.clone());
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;

    use super::*;

    struct ScriptedReader {
        chunks: Vec<Result<Option<Bytes>>>,
    }

    #[async_trait]
    impl ChunkReader for ScriptedReader {
        async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
            if self.chunks.is_empty() {
                Ok(None)
            } else {
                self.chunks.remove(0)
            }
        }
    }

    fn chunks(parts: &[&'static [u8]]) -> Box<dyn ChunkReader> {
        Box::new(ScriptedReader {
            chunks: parts.iter().map(|p| Ok(Some(Bytes::from_static(p)))).collect(),
        })
    }

    #[tokio::test]
    async fn both_sides_see_the_full_stream() {
        let (mut left, mut right) = tee_reader(chunks(&[b"ab", b"cd"]), 1024);

        assert_eq!(left.read_chunk().await.unwrap(), Some(Bytes::from_static(b"ab")));
        assert_eq!(right.read_chunk().await.unwrap(), Some(Bytes::from_static(b"ab")));
        assert_eq!(right.read_chunk().await.unwrap(), Some(Bytes::from_static(b"cd")));
        assert_eq!(left.read_chunk().await.unwrap(), Some(Bytes::from_static(b"cd")));
        assert_eq!(left.read_chunk().await.unwrap(), None);
        assert_eq!(right.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn lagging_side_is_failed_past_the_window() {
        let (mut left, mut right) = tee_reader(chunks(&[b"aaaa", b"bbbb", b"cccc"]), 6);

        // Left races ahead; right's queue exceeds the 6-byte window on the
        // second chunk.
        assert!(left.read_chunk().await.unwrap().is_some());
        assert!(left.read_chunk().await.unwrap().is_some());
        assert!(left.read_chunk().await.unwrap().is_some());
        assert_eq!(left.read_chunk().await.unwrap(), None);

        let err = right.read_chunk().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    }

    #[tokio::test]
    async fn source_errors_reach_both_sides() {
        let (mut left, mut right) = tee_reader(
            Box::new(ScriptedReader {
                chunks: vec![
                    Ok(Some(Bytes::from_static(b"ok"))),
                    Err(StorageError::unavailable("link down")),
                ],
            }),
            1024,
        );

        assert!(left.read_chunk().await.unwrap().is_some());
        assert!(left.read_chunk().await.is_err());

        // Right drains its queued chunk, then observes the same failure.
        assert!(right.read_chunk().await.unwrap().is_some());
        assert_eq!(right.read_chunk().await.unwrap_err().code(), ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn failed_side_does_not_block_the_other() {
        let (mut left, mut right) = tee_reader(chunks(&[b"aaaa", b"bbbb", b"cccc"]), 4);

        assert!(left.read_chunk().await.unwrap().is_some());
        assert!(left.read_chunk().await.unwrap().is_some());
        assert!(left.read_chunk().await.unwrap().is_some());
        assert_eq!(left.read_chunk().await.unwrap(), None);
        assert!(right.read_chunk().await.is_err());
    }
}
