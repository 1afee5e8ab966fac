//! The single ordered queue every write to the canonical tree goes through.
//!
//! Callers submit and get a [`ChangeHandle`] back straight away; one task
//! (see `sync::SyncEngine`) drains the queue and applies jobs strictly in
//! submission order.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bookmark::Bookmark;
use crate::change::{Change, ChangeRecord, ChangeStatus};
use crate::error::{Result, SyncError};

pub const DEFAULT_MAX_RECORDS: usize = 200;

#[derive(Debug)]
pub(crate) enum JobKind {
    Change(Change),
    Upload,
    Pull,
    Restore(Vec<Bookmark>),
    Disable,
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Change(change) => change.kind(),
            JobKind::Upload => "upload",
            JobKind::Pull => "pull",
            JobKind::Restore(_) => "restore",
            JobKind::Disable => "disable",
        }
    }
}

pub(crate) struct Job {
    pub seq: u64,
    pub kind: JobKind,
    pub cancel: CancellationToken,
    pub respond: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct QueueBook {
    next_seq: u64,
    /// Submitted and not yet finished, keyed by seq.
    open: BTreeMap<u64, ChangeRecord>,
    finished: VecDeque<ChangeRecord>,
    max_records: usize,
}

/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    sender: mpsc::UnboundedSender<Job>,
    book: Arc<Mutex<QueueBook>>,
}

/// Returned for every submission. Dropping it does not cancel the job.
pub struct ChangeHandle {
    seq: u64,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<()>>,
}

impl ChangeHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Cancels the job. A job already past its push is not rolled back.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits until the job is applied or has failed.
    pub async fn wait(self) -> Result<()> {
        self.outcome.await.map_err(|_| SyncError::QueueClosed)?
    }
}

impl SyncQueue {
    pub(crate) fn new(max_records: usize) -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let book = QueueBook {
            next_seq: 1,
            max_records: max_records.max(1),
            ..QueueBook::default()
        };
        (
            Self {
                sender,
                book: Arc::new(Mutex::new(book)),
            },
            receiver,
        )
    }

    pub fn submit(&self, change: Change) -> Result<ChangeHandle> {
        self.submit_with_cancel(change, CancellationToken::new())
    }

    /// Submits a change that `cancel` can abort while it waits or pushes.
    pub fn submit_with_cancel(&self, change: Change, cancel: CancellationToken) -> Result<ChangeHandle> {
        self.enqueue(JobKind::Change(change), cancel)
    }

    pub(crate) fn enqueue(&self, kind: JobKind, cancel: CancellationToken) -> Result<ChangeHandle> {
        let (respond, outcome) = oneshot::channel();

        // seq allocation and send happen under one lock so seq order is
        // channel order.
        let mut book = self.book.lock();
        let seq = book.next_seq;
        let change = match &kind {
            JobKind::Change(change) => Some(change.clone()),
            _ => None,
        };
        let record = ChangeRecord::pending(seq, kind.label(), change);

        self.sender
            .send(Job { seq, kind, cancel: cancel.clone(), respond })
            .map_err(|_| SyncError::QueueClosed)?;
        book.next_seq += 1;
        book.open.insert(seq, record);
        debug!("Queued job #{}", seq);

        Ok(ChangeHandle { seq, cancel, outcome })
    }

    pub(crate) fn mark_applying(&self, seq: u64) {
        if let Some(record) = self.book.lock().open.get_mut(&seq) {
            record.status = ChangeStatus::Applying;
        }
    }

    pub(crate) fn mark_finished(&self, seq: u64, outcome: &Result<()>) {
        let mut book = self.book.lock();
        let Some(mut record) = book.open.remove(&seq) else {
            return;
        };
        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => record.status = ChangeStatus::Applied,
            Err(e) => {
                record.status = ChangeStatus::Failed;
                record.error = Some(e.to_string());
                record.retryable = e.is_retryable();
            }
        }

        book.finished.push_back(record);
        while book.finished.len() > book.max_records {
            book.finished.pop_front();
        }
    }

    /// Jobs submitted and not yet started.
    pub fn pending_count(&self) -> usize {
        self.book
            .lock()
            .open
            .values()
            .filter(|r| r.status == ChangeStatus::Pending)
            .count()
    }

    /// The job being applied right now, if any.
    pub fn current(&self) -> Option<ChangeRecord> {
        self.book
            .lock()
            .open
            .values()
            .find(|r| r.status == ChangeStatus::Applying)
            .cloned()
    }

    /// Finished jobs, oldest first, capped at the configured maximum.
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.book.lock().finished.iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reorder(parent: &str) -> Change {
        Change::Reorder { parent_id: parent.into(), child_ids: vec![] }
    }

    #[tokio::test]
    async fn test_jobs_arrive_in_submission_order() {
        let (queue, mut receiver) = SyncQueue::new(10);
        let first = queue.submit(reorder("1")).unwrap();
        let second = queue.submit(reorder("2")).unwrap();
        assert!(first.seq() < second.seq());
        assert_eq!(queue.pending_count(), 2);

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.seq, first.seq());
        queue.mark_applying(job.seq);
        assert_eq!(queue.current().map(|r| r.seq), Some(first.seq()));
        assert_eq!(queue.pending_count(), 1);

        queue.mark_finished(job.seq, &Ok(()));
        job.respond.send(Ok(())).unwrap();
        first.wait().await.unwrap();

        let records = queue.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ChangeStatus::Applied);
        assert!(queue.current().is_none());
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_capped() {
        let (queue, mut receiver) = SyncQueue::new(2);
        for parent in ["1", "2", "3"] {
            queue.submit(reorder(parent)).unwrap();
        }
        while let Ok(job) = receiver.try_recv() {
            queue.mark_applying(job.seq);
            let outcome = Err(SyncError::RemoteSync("offline".into()));
            queue.mark_finished(job.seq, &outcome);
        }

        let records = queue.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 2);
        assert!(records.iter().all(|r| r.status == ChangeStatus::Failed && r.retryable));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, receiver) = SyncQueue::new(10);
        let handle = queue.submit(reorder("1")).unwrap();
        drop(receiver);

        assert!(matches!(handle.wait().await, Err(SyncError::QueueClosed)));
        assert!(queue.is_closed());
        assert!(matches!(queue.submit(reorder("2")), Err(SyncError::QueueClosed)));
    }
}
