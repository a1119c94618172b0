use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded, select, unbounded};
use tracing::{debug, error, info, warn};

use crate::client::{Page, SearchClient};
use crate::destination::Destination;
use crate::error::DumpError;
use crate::report::{DumpReport, IndexOutcome};

const PROGRESS_STEP_PERCENT: u8 = 10;

/// How long a worker waits to hand a continuation back to the queue.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub enqueue_timeout: Duration,
}

impl PipelineOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            enqueue_timeout: ENQUEUE_TIMEOUT,
        }
    }
}

/// Drains indexes through the scroll API with a fixed pool of worker threads.
///
/// All work flows through one bounded queue: seeding puts an open request per index on it,
/// and every page that yields documents puts exactly one continuation back. Each index
/// therefore has at most one task in flight, and the queue is sized to hold one task per
/// index so that handing a continuation back never has to wait for another worker.
///
/// Whether an index is finished is tracked separately from the queue, see [`Ticket`].
pub struct ScrollPipeline {
    client: Arc<SearchClient>,
    destination: Arc<dyn Destination>,
    options: PipelineOptions,
    cancel: Arc<AtomicBool>,
}

impl ScrollPipeline {
    pub fn new(
        client: Arc<SearchClient>,
        destination: Arc<dyn Destination>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            destination,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag stops every index at its next page boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Dumps `indexes` and blocks until each of them is drained, failed or cancelled.
    ///
    /// Per-index problems end up in the report; an `Err` means the pool could not be started.
    /// The destination is left open.
    pub fn run(&self, indexes: &[String]) -> Result<DumpReport> {
        let started = Instant::now();
        let worker_count = self.options.concurrency.max(1);
        let capacity = worker_count.max(indexes.len()).max(1);

        let (queue_tx, queue_rx) = bounded::<Task>(capacity);
        let (done_tx, done_rx) = unbounded::<PositionedOutcome>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        info!(
            indexes = indexes.len(),
            workers = worker_count,
            capacity,
            "starting scroll dump"
        );

        // Fits without blocking: the queue holds one task per index.
        for (position, index) in indexes.iter().enumerate() {
            let ticket = Ticket::new(position, index.clone(), done_tx.clone());
            queue_tx
                .send(Task::Open(ticket))
                .map_err(|_| anyhow!("scroll queue closed while seeding"))?;
        }
        drop(done_tx);

        let workers = self.spawn_workers(worker_count, &queue_tx, queue_rx, shutdown_rx)?;
        drop(queue_tx);

        let outcomes = CompletionTracker::new(indexes.len(), done_rx).wait();

        drop(shutdown_tx);
        workers.wait();

        let report = DumpReport {
            indexes: outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            documents = report.total_documents(),
            incomplete = report.failures().count(),
            elapsed_ms = report.elapsed.as_millis(),
            "scroll dump finished"
        );
        Ok(report)
    }

    fn spawn_workers(
        &self,
        count: usize,
        queue_tx: &Sender<Task>,
        queue_rx: Receiver<Task>,
        shutdown_rx: Receiver<()>,
    ) -> Result<WorkerGroup> {
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let worker = Worker {
                id,
                client: Arc::clone(&self.client),
                destination: Arc::clone(&self.destination),
                queue: queue_tx.clone(),
                enqueue_timeout: self.options.enqueue_timeout,
                cancel: Arc::clone(&self.cancel),
            };
            let tasks = queue_rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("scroll-worker-{id}"))
                .spawn(move || worker.run(tasks, shutdown))
                .context("failed to spawn scroll worker")?;
            handles.push(handle);
        }

        drop(queue_rx);

        Ok(WorkerGroup { handles })
    }
}

enum Task {
    Open(Ticket),
    Advance(Cursor),
}

impl Task {
    fn into_ticket(self) -> Ticket {
        match self {
            Task::Open(ticket) => ticket,
            Task::Advance(cursor) => cursor.ticket,
        }
    }
}

/// The next page to fetch for an index.
struct Cursor {
    ticket: Ticket,
    scroll_id: String,
}

/// Owns the right to report an index as finished.
///
/// One ticket is created per index and travels with its scroll chain. `finish` consumes it,
/// and dropping an unfinished ticket (a worker panicked, the queue went away) reports the
/// index as abandoned, so every index is reported exactly once.
struct Ticket {
    progress: Progress,
    done: Sender<PositionedOutcome>,
    reported: bool,
}

struct Progress {
    position: usize,
    index: String,
    documents: u64,
    pages: u64,
    total: Option<u64>,
    last_percent: u8,
}

type PositionedOutcome = (usize, IndexOutcome);

impl Ticket {
    fn new(position: usize, index: String, done: Sender<PositionedOutcome>) -> Self {
        Self {
            progress: Progress {
                position,
                index,
                documents: 0,
                pages: 0,
                total: None,
                last_percent: 0,
            },
            done,
            reported: false,
        }
    }

    fn index(&self) -> &str {
        &self.progress.index
    }

    fn finish(mut self, result: Result<(), DumpError>) {
        self.report(result);
    }

    fn report(&mut self, result: Result<(), DumpError>) {
        if self.reported {
            return;
        }
        self.reported = true;

        let progress = &mut self.progress;
        match &result {
            Ok(()) => info!(
                index = %progress.index,
                documents = progress.documents,
                pages = progress.pages,
                "index drained"
            ),
            Err(err) => warn!(
                index = %progress.index,
                documents = progress.documents,
                pages = progress.pages,
                kind = err.kind(),
                error = %err,
                "index stopped before it was drained"
            ),
        }

        let outcome = IndexOutcome::new(
            std::mem::take(&mut progress.index),
            progress.documents,
            progress.pages,
            result,
        );
        // The tracker outlives every ticket unless `run` itself bailed out.
        let _ = self.done.send((progress.position, outcome));
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.report(Err(DumpError::Abandoned));
    }
}

/// Counts indexes down to zero, keeping outcomes in request order.
struct CompletionTracker {
    remaining: usize,
    done: Receiver<PositionedOutcome>,
    outcomes: Vec<Option<IndexOutcome>>,
}

impl CompletionTracker {
    fn new(expected: usize, done: Receiver<PositionedOutcome>) -> Self {
        Self {
            remaining: expected,
            done,
            outcomes: (0..expected).map(|_| None).collect(),
        }
    }

    fn wait(mut self) -> Vec<IndexOutcome> {
        while self.remaining > 0 {
            // Senders live inside tickets; once all are gone every index has reported.
            let Ok((position, outcome)) = self.done.recv() else {
                break;
            };
            match self.outcomes.get_mut(position) {
                Some(slot @ None) => {
                    *slot = Some(outcome);
                    self.remaining -= 1;
                }
                _ => error!(index = %outcome.index, "ignoring duplicate completion"),
            }
        }

        self.outcomes.into_iter().flatten().collect()
    }
}

struct Worker {
    id: usize,
    client: Arc<SearchClient>,
    destination: Arc<dyn Destination>,
    queue: Sender<Task>,
    enqueue_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, tasks: Receiver<Task>, shutdown: Receiver<()>) {
        debug!(worker = self.id, "scroll worker started");
        loop {
            select! {
                recv(tasks) -> task => match task {
                    Ok(task) => self.handle(task),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        debug!(worker = self.id, "scroll worker stopped");
    }

    fn handle(&self, task: Task) {
        if self.cancel.load(Ordering::Relaxed) {
            task.into_ticket().finish(Err(DumpError::Cancelled));
            return;
        }

        match task {
            Task::Open(mut ticket) => match self.client.open_scroll(ticket.index()) {
                Ok(page) => {
                    ticket.progress.total = page.total;
                    debug!(
                        index = %ticket.index(),
                        total = ?page.total,
                        "scroll opened"
                    );
                    // Scan mode answers the open request without hits; that is not exhaustion.
                    self.deliver(ticket, page);
                }
                Err(err) => ticket.finish(Err(err)),
            },
            Task::Advance(cursor) => match self.client.next_page(&cursor.scroll_id) {
                Ok(page) if page.documents.is_empty() => cursor.ticket.finish(Ok(())),
                Ok(page) => self.deliver(cursor.ticket, page),
                Err(err) => cursor.ticket.finish(Err(err)),
            },
        }
    }

    /// Hands every document of `page` to the destination, then queues the continuation.
    fn deliver(&self, mut ticket: Ticket, page: Page) {
        let Page {
            scroll_id,
            documents,
            ..
        } = page;

        let count = documents.len() as u64;
        for doc in documents {
            let id = doc.id.clone();
            if let Err(source) = self.destination.process(doc) {
                let index = ticket.index().to_string();
                error!(index = %index, id = %id, error = %source, "destination write failed");
                ticket.finish(Err(DumpError::Destination { index, id, source }));
                return;
            }
            ticket.progress.documents += 1;
        }

        if count > 0 {
            let progress = &mut ticket.progress;
            progress.pages += 1;
            debug!(
                index = %progress.index,
                documents = count,
                page = progress.pages,
                "page delivered"
            );
            maybe_log_progress(progress);
        }

        self.requeue(Cursor { ticket, scroll_id });
    }

    /// `run` sizes the queue so this never waits. If a full queue does turn the continuation
    /// away, the index fails with `Backpressure` instead of losing its remaining pages quietly.
    fn requeue(&self, cursor: Cursor) {
        match self
            .queue
            .send_timeout(Task::Advance(cursor), self.enqueue_timeout)
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(Task::Advance(cursor))) => {
                let index = cursor.ticket.index().to_string();
                warn!(
                    index = %index,
                    scroll_id = %cursor.scroll_id,
                    waited_ms = self.enqueue_timeout.as_millis(),
                    "scroll queue did not accept continuation"
                );
                cursor.ticket.finish(Err(DumpError::Backpressure {
                    index,
                    scroll_id: cursor.scroll_id,
                    waited: self.enqueue_timeout,
                }));
            }
            // Only reachable while shutting down; dropping the ticket reports the index.
            Err(err) => drop(err.into_inner()),
        }
    }
}

fn maybe_log_progress(progress: &mut Progress) {
    let Some(total) = progress.total.filter(|t| *t > 0) else {
        return;
    };

    let percent = (progress.documents.saturating_mul(100) / total).min(100) as u8;
    let should_log = percent >= progress.last_percent.saturating_add(PROGRESS_STEP_PERCENT)
        || (percent == 100 && progress.last_percent < 100);

    if should_log {
        progress.last_percent = percent;
        info!(
            index = %progress.index,
            percent,
            documents = progress.documents,
            total,
            "dump progress"
        );
    }
}

struct WorkerGroup {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    fn wait(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("scroll worker panicked");
            }
        }
    }
}
