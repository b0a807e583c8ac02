//! Object enumeration over paginated listings

use crate::backend::{ObjectSummary, StorageBackend};
use crate::error::{Error, Result};
use futures::stream::{self, Stream, TryStreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ObjectLister {
    backend: Arc<dyn StorageBackend>,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

struct ListState {
    buffered: VecDeque<ObjectSummary>,
    cursor: Cursor,
}

impl ObjectLister {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Lazily enumerate objects under `prefix`.
    ///
    /// Pages are requested only as the stream is polled. When `recursive` is
    /// false, keys below the next `/` are folded into one folder entry.
    pub fn stream(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> impl Stream<Item = Result<ObjectSummary>> + Send + 'static {
        let backend = self.backend.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        let initial = ListState {
            buffered: VecDeque::new(),
            cursor: Cursor::Start,
        };

        stream::try_unfold(initial, move |mut state| {
            let backend = backend.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            async move {
                loop {
                    if let Some(object) = state.buffered.pop_front() {
                        return Ok::<_, Error>(Some((object, state)));
                    }

                    let token = match std::mem::replace(&mut state.cursor, Cursor::Done) {
                        Cursor::Done => return Ok(None),
                        Cursor::Start => None,
                        Cursor::Next(token) => Some(token),
                    };

                    let page = backend
                        .list_objects_page(&bucket, &prefix, recursive, token)
                        .await?;
                    debug!(bucket = %bucket, count = page.objects.len(), more = page.next_token.is_some(), "listed page");

                    state.buffered.extend(page.objects);
                    if let Some(next) = page.next_token {
                        state.cursor = Cursor::Next(next);
                    }
                }
            }
        })
    }

    /// Collect the full listing, failing on the first error.
    pub async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<ObjectSummary>> {
        self.stream(bucket, prefix, recursive).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryBackend;
    use futures::StreamExt;

    fn backend_with(keys: &[&str]) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new().with_bucket("test"));
        for key in keys {
            backend.insert_object("test", key, "data");
        }
        backend
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let backend = backend_with(&["a", "b", "c", "d", "e"]);
        backend.set_page_size(2);
        let lister = ObjectLister::new(backend.clone());

        let objects = lister.list("test", "", true).await.unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();

        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(backend.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let backend = backend_with(&["a", "b", "c"]);
        backend.set_page_size(1);
        let lister = ObjectLister::new(backend.clone());

        let mut stream = Box::pin(lister.stream("test", "", true));
        assert_eq!(backend.list_calls(), 0);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.key, "a");
        assert_eq!(backend.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_discards_partial_listing() {
        let backend = backend_with(&["a", "b", "c"]);
        backend.set_page_size(1);
        backend.set_fail_listing_after(Some(2));
        let lister = ObjectLister::new(backend);

        let err = lister.list("test", "", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_each_call_restarts_enumeration() {
        let backend = backend_with(&["x/1", "x/2", "y"]);
        let lister = ObjectLister::new(backend.clone());

        let first = lister.list("test", "", false).await.unwrap();
        backend.insert_object("test", "z", "late");
        let second = lister.list("test", "", false).await.unwrap();

        let keys: Vec<_> = first.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["x/", "y"]);
        assert_eq!(second.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let lister = ObjectLister::new(backend_with(&[]));
        let err = lister.list("nope", "", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
    }
}
