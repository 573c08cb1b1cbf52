//! Batch scheduler
//!
//! Rows run in consecutive batches of `workers` rows. Each batch gets a fresh
//! pool of worker threads fed from a [`WorkQueue`]; once the queue drains the
//! workers are told to stop and joined with a deadline. The batch's audit
//! notes are then flushed to the remote table before the next batch starts.

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{Job, WorkQueue};
use crate::config::SchedulerConfig;
use crate::pipeline::{RowOutcome, RowProcessor};
use crate::row::RowError;

/// Totals for one run over the main table
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub batches: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub validation_failures: usize,
    pub processing_failures: usize,
    /// Workers still running when their batch's join deadline passed
    pub abandoned_workers: usize,
    pub failed_flushes: usize,
    /// Audit rows still waiting for the remote table at the end of the run
    pub pending_after_run: usize,
    pub outcomes: Vec<RowOutcome>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Local::now(),
            finished_at: None,
            batches: 0,
            updated: 0,
            unchanged: 0,
            validation_failures: 0,
            processing_failures: 0,
            abandoned_workers: 0,
            failed_flushes: 0,
            pending_after_run: 0,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: RowOutcome) {
        match &outcome {
            RowOutcome::Success { updated: true, .. } => self.updated += 1,
            RowOutcome::Success { updated: false, .. } => self.unchanged += 1,
            RowOutcome::ValidationFailure { .. } => self.validation_failures += 1,
            RowOutcome::ProcessingFailure { .. } => self.processing_failures += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Rows that produced an outcome
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> usize {
        self.validation_failures + self.processing_failures
    }
}

/// Split indexes into consecutive batches of at most `size`
pub fn partition(indexes: &[usize], size: usize) -> Vec<Vec<usize>> {
    indexes.chunks(size.max(1)).map(<[usize]>::to_vec).collect()
}

enum WorkerEvent {
    Finished(RowOutcome),
    Exited(usize),
}

/// Reports a worker's exit even when it unwinds
struct ExitGuard {
    id: usize,
    events: Sender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited(self.id));
    }
}

/// Drives rows through a [`RowProcessor`] batch by batch
pub struct BatchScheduler {
    processor: Arc<RowProcessor>,
    workers: usize,
    join_timeout: Duration,
}

impl BatchScheduler {
    pub fn new(processor: Arc<RowProcessor>, workers: usize) -> Self {
        Self {
            processor,
            workers: workers.max(1),
            join_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(processor: Arc<RowProcessor>, config: &SchedulerConfig) -> Self {
        Self::new(processor, config.workers).with_join_timeout(config.join_timeout())
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn processor(&self) -> &Arc<RowProcessor> {
        &self.processor
    }

    /// Re-read the main table and run every flagged row
    pub fn run_all(&self) -> Result<RunSummary, RowError> {
        let loader = self.processor.loader();
        loader.refresh()?;
        let indexes = loader.run_indexes()?;
        loader.prefetch(&indexes);
        Ok(self.run(&indexes))
    }

    /// Run the given rows
    pub fn run(&self, indexes: &[usize]) -> RunSummary {
        let mut summary = RunSummary::new();
        info!(run_id = %summary.run_id, rows = indexes.len(), workers = self.workers, "Run started");

        for batch in partition(indexes, self.workers) {
            summary.batches += 1;
            self.run_batch(&batch, &mut summary);
            self.flush(&mut summary);
        }

        let ledger = self.processor.ledger();
        if ledger.has_pending() {
            info!(pending = ledger.pending_len(), "Retrying flush of pending audit notes");
            self.flush(&mut summary);
        }
        summary.pending_after_run = ledger.pending_len();
        summary.finished_at = Some(Local::now());

        info!(
            run_id = %summary.run_id,
            batches = summary.batches,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failures = summary.failures(),
            abandoned = summary.abandoned_workers,
            pending = summary.pending_after_run,
            "Run finished"
        );
        summary
    }

    fn flush(&self, summary: &mut RunSummary) {
        if let Err(e) = self.processor.ledger().flush() {
            error!(error = %e, "Audit flush failed, notes stay queued");
            summary.failed_flushes += 1;
        }
    }

    fn run_batch(&self, batch: &[usize], summary: &mut RunSummary) {
        debug!(rows = ?batch, "run_batch: called");
        let queue = Arc::new(WorkQueue::new());
        for &index in batch {
            queue.push(Job::Row(index));
        }

        let (events_tx, events_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let queue = queue.clone();
            let processor = self.processor.clone();
            let events = events_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("rp-worker-{}", id))
                .spawn(move || worker_loop(id, &queue, &processor, events));
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => error!(worker = id, error = %e, "Failed to spawn worker"),
            }
        }
        drop(events_tx);

        if handles.is_empty() {
            warn!("No workers running, processing batch on the scheduler thread");
            while let Some(job) = queue.try_pop() {
                if let Job::Row(index) = job {
                    summary.record(self.processor.process(index).0);
                }
                queue.task_done();
            }
            return;
        }

        queue.join();
        for _ in 0..handles.len() {
            queue.push(Job::Stop);
        }

        let deadline = Instant::now() + self.join_timeout;
        let mut exited = HashSet::new();
        while exited.len() < handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events_rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Finished(outcome)) => summary.record(outcome),
                Ok(WorkerEvent::Exited(id)) => {
                    exited.insert(id);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Outcomes sent right before the deadline
        while let Ok(event) = events_rx.try_recv() {
            match event {
                WorkerEvent::Finished(outcome) => summary.record(outcome),
                WorkerEvent::Exited(id) => {
                    exited.insert(id);
                }
            }
        }

        for (id, handle) in handles {
            if exited.contains(&id) {
                if handle.join().is_err() {
                    warn!(worker = id, "Worker panicked");
                }
            } else {
                warn!(worker = id, timeout = ?self.join_timeout, "Worker did not stop in time, abandoning it");
                summary.abandoned_workers += 1;
            }
        }
    }
}

fn worker_loop(id: usize, queue: &WorkQueue<Job>, processor: &RowProcessor, events: Sender<WorkerEvent>) {
    let _guard = ExitGuard {
        id,
        events: events.clone(),
    };
    debug!(worker = id, "worker_loop: started");
    loop {
        match queue.pop() {
            Job::Stop => {
                queue.task_done();
                break;
            }
            Job::Row(index) => {
                let (outcome, relax) = processor.process(index);
                let _ = events.send(WorkerEvent::Finished(outcome));
                queue.task_done();
                if !relax.is_zero() {
                    debug!(worker = id, ?relax, "worker_loop: relaxing");
                    thread::sleep(relax);
                }
            }
        }
    }
    debug!(worker = id, "worker_loop: stopped");
}
