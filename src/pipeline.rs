//! Batched indexing of records into a backend collection.
//!
//! A [`Repository`] splits a record stream into batches of a fixed size and
//! submits them through a [`BulkBackend`]. Each batch ends with exactly one
//! [`BatchOutcome`]:
//!
//! - `Success` when every record was accepted,
//! - `PartialItemFailure` listing the records the backend rejected,
//! - `Fatal` when the request as a whole failed.
//!
//! The synchronous path submits one batch at a time and stops at the first
//! fatal batch. The asynchronous path keeps up to
//! [`IndexerConfig::max_in_flight`] batches running on the blocking pool
//! and never lets one batch's failure cancel another.

use std::{collections::VecDeque, marker::PhantomData, sync::Arc};

use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, warn};

use crate::{
    backend::{BulkBackend, Scroll, StoredDocument},
    condition::Condition,
    config::IndexerConfig,
    error::{Error, Result},
    record::Record,
    schema::Schema,
};

/// Where an indexing call stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Batching,
    Submitting,
    Completed,
    PartiallyFailed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }
}

/// A record the backend refused, by its position in the whole call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub record_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    PartialItemFailure(Vec<ItemFailure>),
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Zero-based batch number within the call.
    pub batch: usize,
    /// Index of the batch's first record within the call.
    pub first_record: usize,
    pub size: usize,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, BatchStatus::Fatal(_))
    }

    pub fn failures(&self) -> &[ItemFailure] {
        match &self.status {
            BatchStatus::PartialItemFailure(failures) => failures,
            _ => &[],
        }
    }

    /// Records the backend accepted.
    pub fn accepted(&self) -> usize {
        match &self.status {
            BatchStatus::Success => self.size,
            BatchStatus::PartialItemFailure(failures) => {
                self.size - failures.len()
            }
            BatchStatus::Fatal(_) => 0,
        }
    }
}

/// Outcomes of one indexing call, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub state: PipelineState,
    pub outcomes: Vec<BatchOutcome>,
}

impl IndexReport {
    fn from_outcomes(outcomes: Vec<BatchOutcome>) -> Self {
        let state = if outcomes.iter().any(BatchOutcome::is_fatal) {
            PipelineState::Failed
        } else if outcomes.iter().any(|o| !o.failures().is_empty()) {
            PipelineState::PartiallyFailed
        } else {
            PipelineState::Completed
        };
        Self { state, outcomes }
    }

    pub fn accepted(&self) -> usize {
        self.outcomes.iter().map(BatchOutcome::accepted).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.outcomes.iter().flat_map(BatchOutcome::failures)
    }

    /// The first fatal batch, if any.
    pub fn fatal(&self) -> Option<&BatchOutcome> {
        self.outcomes.iter().find(|o| o.is_fatal())
    }
}

/// Groups an iterator into vectors of at most `size` items, never empty.
#[derive(Debug)]
pub struct Batches<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.inner.by_ref().take(self.size).collect();
        (!batch.is_empty()).then_some(batch)
    }
}

pub fn batches<I: IntoIterator>(
    items: I,
    size: usize,
) -> Result<Batches<I::IntoIter>> {
    if size == 0 {
        return Err(Error::InvalidConfiguration(
            "batch_size must be a positive integer, got 0".into(),
        ));
    }
    Ok(Batches {
        inner: items.into_iter(),
        size,
    })
}

/// Submit one batch and classify the backend's answer.
fn submit_batch<S: Schema, B: BulkBackend<S> + ?Sized>(
    backend: &B,
    collection: &str,
    batch: usize,
    first_record: usize,
    records: &[Record<S>],
) -> BatchOutcome {
    debug!(
        batch,
        size = records.len(),
        state = ?PipelineState::Submitting,
        "submitting batch"
    );
    let status = match backend.submit(collection, records) {
        Err(e) => {
            error!(batch, error = %e, "batch failed");
            BatchStatus::Fatal(e.to_string())
        }
        Ok(response) if response.items.len() != records.len() => {
            let reason = format!(
                "backend answered {} items for {} records",
                response.items.len(),
                records.len()
            );
            error!(batch, "{reason}");
            BatchStatus::Fatal(reason)
        }
        Ok(response) => {
            let failures: Vec<_> = response
                .rejections()
                .map(|(i, reason)| ItemFailure {
                    record_index: first_record + i,
                    reason: reason.to_string(),
                })
                .collect();
            if failures.is_empty() {
                BatchStatus::Success
            } else {
                warn!(
                    batch,
                    rejected = failures.len(),
                    "batch partially failed"
                );
                BatchStatus::PartialItemFailure(failures)
            }
        }
    };
    BatchOutcome {
        batch,
        first_record,
        size: records.len(),
        status,
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    Error::Task(err.to_string())
}

/// Records of schema `S` stored in one backend collection.
pub struct Repository<S, B> {
    backend: Arc<B>,
    config: IndexerConfig,
    _schema: PhantomData<fn() -> S>,
}

impl<S, B> Clone for Repository<S, B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            _schema: PhantomData,
        }
    }
}

impl<S, B> std::fmt::Debug for Repository<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Schema, B: BulkBackend<S> + 'static> Repository<S, B> {
    pub fn new(backend: Arc<B>, config: IndexerConfig) -> Self {
        Self {
            backend,
            config,
            _schema: PhantomData,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn collection(&self) -> &str {
        self.config.collection()
    }

    /// Index records in batches of `batch_size`, one batch at a time.
    ///
    /// Batch `k + 1` is only submitted once batch `k` has an outcome. A
    /// fatal batch ends the call; the report then holds the outcomes up to
    /// and including that batch.
    pub fn index_records<I>(
        &self,
        records: I,
        batch_size: usize,
    ) -> Result<IndexReport>
    where
        I: IntoIterator<Item = Record<S>>,
    {
        let batches = batches(records, batch_size)?;
        debug!(
            collection = self.collection(),
            state = ?PipelineState::Batching,
            batch_size,
            "indexing records"
        );
        self.backend.ensure_collection(self.collection())?;

        let mut outcomes = Vec::new();
        let mut first_record = 0;
        for (batch, records) in batches.enumerate() {
            let outcome = submit_batch(
                &*self.backend,
                self.collection(),
                batch,
                first_record,
                &records,
            );
            first_record += records.len();
            let fatal = outcome.is_fatal();
            outcomes.push(outcome);
            if fatal {
                break;
            }
        }

        Ok(IndexReport::from_outcomes(outcomes))
    }

    /// Index a single record.
    pub fn index_record(&self, record: Record<S>) -> Result<BatchOutcome> {
        self.backend.ensure_collection(self.collection())?;
        Ok(submit_batch(
            &*self.backend,
            self.collection(),
            0,
            0,
            std::slice::from_ref(&record),
        ))
    }

    /// Index records in batches of `batch_size` without waiting for each
    /// batch before dispatching the next.
    ///
    /// Submissions run on the blocking pool, at most `max_in_flight` at a
    /// time; the producer waits for a free slot before dispatching more.
    /// `on_complete` runs once per batch, on the worker that submitted it,
    /// in no particular order. The returned report lists outcomes in batch
    /// order.
    pub async fn index_records_with<I, F>(
        &self,
        records: I,
        batch_size: usize,
        on_complete: F,
    ) -> Result<IndexReport>
    where
        I: IntoIterator<Item = Record<S>>,
        F: Fn(&BatchOutcome) + Send + Sync + 'static,
    {
        let batches = batches(records, batch_size)?;
        let collection: Arc<str> = Arc::from(self.collection());

        let backend = Arc::clone(&self.backend);
        let target = Arc::clone(&collection);
        tokio::task::spawn_blocking(move || backend.ensure_collection(&target))
            .await
            .map_err(join_error)??;

        let slots = Arc::new(Semaphore::new(self.config.max_in_flight()));
        let on_complete = Arc::new(on_complete);
        let mut tasks = JoinSet::new();
        let mut first_record = 0;

        for (batch, records) in batches.enumerate() {
            let permit = Arc::clone(&slots)
                .acquire_owned()
                .await
                .map_err(|e| Error::Task(e.to_string()))?;
            let backend = Arc::clone(&self.backend);
            let collection = Arc::clone(&collection);
            let on_complete = Arc::clone(&on_complete);
            let start = first_record;
            first_record += records.len();

            tasks.spawn_blocking(move || {
                let outcome = submit_batch(
                    &*backend,
                    &collection,
                    batch,
                    start,
                    &records,
                );
                drop(permit);
                on_complete(&outcome);
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(join_error)?);
        }
        outcomes.sort_by_key(|o| o.batch);
        Ok(IndexReport::from_outcomes(outcomes))
    }

    /// Ask the backend to remove every record of this collection.
    ///
    /// `true` means the request was acknowledged; the deletion may not be
    /// visible yet.
    pub fn delete_all_records(&self) -> Result<bool> {
        Ok(self.backend.delete_all(self.collection())?)
    }

    /// Iterate over the records currently stored in this collection.
    ///
    /// Each call starts a fresh pass over a snapshot taken now.
    pub fn stream(&self) -> Result<RecordStream<S>> {
        let scroll = self
            .backend
            .open_scroll(self.collection(), self.config.page_size())?;
        Ok(RecordStream {
            scroll,
            page: VecDeque::new(),
            done: false,
            _schema: PhantomData,
        })
    }

    /// Records matching `condition`, at most `limit`.
    pub fn search(
        &self,
        condition: &Condition<S>,
        limit: usize,
    ) -> Result<Vec<Record<S>>> {
        debug!(query = %condition, limit, "searching");
        self.backend
            .search(self.collection(), condition, limit)?
            .into_iter()
            .map(StoredDocument::into_record)
            .collect()
    }
}

/// Lazy, forward-only iterator over stored records.
pub struct RecordStream<S> {
    scroll: Box<dyn Scroll>,
    page: VecDeque<StoredDocument>,
    done: bool,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Iterator for RecordStream<S> {
    type Item = Result<Record<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            match self.scroll.next_page() {
                Ok(page) if page.is_empty() => self.done = true,
                Ok(page) => self.page.extend(page),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        self.page.pop_front().map(StoredDocument::into_record)
    }
}
