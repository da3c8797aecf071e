//! Background mirroring of committed publications into the search index.
//!
//! Jobs go through a bounded queue to one worker task spawned at startup, so a
//! job outlives the request that scheduled it and jobs are applied in the order
//! they were scheduled. Enqueueing never waits: a full queue drops the job.
//! Failures are logged and counted, never retried.

use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info_span, warn};
use utoipa::ToSchema;

use super::{SearchDocument, SearchIndex};
use crate::storage::Publication;

enum Job {
    Index(SearchDocument),
    Remove(i64),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    indexed: AtomicU64,
    removed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time synchronizer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncStats {
    pub indexed: u64,
    pub removed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle used by the write path to schedule index updates. Cheap to clone.
#[derive(Clone)]
pub struct SearchSync {
    jobs: mpsc::Sender<Job>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for SearchSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSync")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SearchSync {
    /// Start the worker. It stops once every handle has been dropped and the
    /// queue is drained.
    pub fn spawn(index: Arc<dyn SearchIndex>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (jobs, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run(index, rx, Arc::clone(&counters)));
        (Self { jobs, counters }, worker)
    }

    /// Schedule `publication` to be (re)indexed.
    pub fn index_publication(&self, publication: &Publication) {
        self.enqueue(Job::Index(SearchDocument::from(publication)), publication.id);
    }

    /// Schedule removal of the document for publication `id`.
    pub fn remove_publication(&self, id: i64) {
        self.enqueue(Job::Remove(id), id);
    }

    fn enqueue(&self, job: Job, id: i64) {
        match self.jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(publication_id = id, "search sync queue full, job dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(publication_id = id, "search sync worker stopped, job dropped");
            }
        }
    }

    /// Wait until every job scheduled before this call has been applied.
    /// Returns immediately if the worker is gone.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.jobs.send(Job::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run(index: Arc<dyn SearchIndex>, mut rx: mpsc::Receiver<Job>, counters: Arc<Counters>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Index(document) => {
                let id = document.id;
                let span = info_span!("search.sync", operation = "index", publication_id = id);
                match index.upsert(&document).instrument(span).await {
                    Ok(()) => {
                        counters.indexed.fetch_add(1, Ordering::Relaxed);
                        debug!(publication_id = id, "publication indexed");
                    }
                    Err(err) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(publication_id = id, "failed to index publication: {err}");
                    }
                }
            }
            Job::Remove(id) => {
                let span = info_span!("search.sync", operation = "remove", publication_id = id);
                match index.delete(id).instrument(span).await {
                    Ok(()) => {
                        counters.removed.fetch_add(1, Ordering::Relaxed);
                        debug!(publication_id = id, "publication removed from index");
                    }
                    Err(err) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(publication_id = id, "failed to remove publication from index: {err}");
                    }
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("search sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MemoryIndex;
    use chrono::{NaiveDate, Utc};

    fn publication(id: i64, title: &str) -> Publication {
        Publication {
            id,
            title: title.to_string(),
            abstract_text: String::new(),
            doi: None,
            publication_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap_or_default(),
            journal: String::new(),
            volume: String::new(),
            issue: String::new(),
            pages: String::new(),
            publisher: String::new(),
            url: String::new(),
            citation_count: 0,
            authors: vec![],
            keywords: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn jobs_apply_in_order() {
        let index = Arc::new(MemoryIndex::new());
        let (sync, _worker) = SearchSync::spawn(index.clone(), 16);

        sync.index_publication(&publication(1, "first"));
        sync.index_publication(&publication(1, "second"));
        sync.index_publication(&publication(2, "other"));
        sync.remove_publication(2);
        sync.flush().await;

        assert_eq!(index.get(1).map(|d| d.title), Some("second".to_string()));
        assert!(index.get(2).is_none());
        assert_eq!(
            sync.stats(),
            SyncStats {
                indexed: 3,
                removed: 1,
                failed: 0,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn failures_are_counted_not_raised() {
        let index = Arc::new(MemoryIndex::new());
        index.set_available(false);
        let (sync, _worker) = SearchSync::spawn(index.clone(), 16);

        sync.index_publication(&publication(1, "x"));
        sync.remove_publication(1);
        sync.flush().await;

        assert_eq!(sync.stats().failed, 2);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn worker_stops_when_handles_drop() {
        let index = Arc::new(MemoryIndex::new());
        let (sync, worker) = SearchSync::spawn(index.clone(), 4);
        sync.index_publication(&publication(1, "x"));
        drop(sync);

        assert!(worker.await.is_ok());
        assert_eq!(index.len(), 1);
    }
}
