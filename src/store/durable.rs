use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

use super::{BookingRepository, InMemoryStore, StoreError};

type Reply = oneshot::Sender<Result<Option<Booking>, StoreError>>;

enum WalCommand {
    Append { event: Event, response: Reply },
    Compact {
        response: oneshot::Sender<Result<usize, StoreError>>,
    },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Durable booking store: WAL on disk, `InMemoryStore` for reads.
///
/// The writer task is the only thing that mutates the in-memory state, and it
/// does so strictly in log order after each batch is fsynced. A batch that
/// fails is cut from the log before its callers hear about it, so neither
/// memory nor a later replay ever sees it.
pub struct WalStore {
    memory: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open(&path)?;
        let memory = Arc::new(InMemoryStore::new());
        for event in &events {
            memory.apply_event(event);
        }
        info!(
            "opened {} ({} events, {} bookings, next id {})",
            path.display(),
            events.len(),
            memory.count(),
            memory.next_id()
        );
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(memory.count() as f64);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, memory.clone(), wal_rx));
        Ok(Self { memory, wal_tx })
    }

    async fn submit(&self, event: Event) -> Result<Option<Booking>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        rx.await.map_err(|_| StoreError::WriterGone)?
    }

    /// Rewrite the WAL as a watermark plus one record per live booking.
    /// Returns the number of live bookings written.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        rx.await.map_err(|_| StoreError::WriterGone)?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl BookingRepository for WalStore {
    async fn get_all(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self.memory.all())
    }

    async fn get_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.memory.get(id))
    }

    async fn get_by_resource(&self, resource_id: ResourceId) -> Result<Vec<Booking>, StoreError> {
        Ok(self.memory.for_resource(resource_id))
    }

    async fn insert(&self, new: NewBooking) -> Result<Booking, StoreError> {
        let booking = Booking::from_new(self.memory.reserve_id(), new);
        self.submit(Event::BookingCreated { booking }).await?;
        Ok(booking)
    }

    async fn replace(&self, id: BookingId, new: NewBooking) -> Result<Booking, StoreError> {
        if self.memory.get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        let booking = Booking::from_new(id, new);
        self.submit(Event::BookingReplaced { booking }).await?;
        Ok(booking)
    }

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        if self.memory.get(id).is_none() {
            return Ok(None);
        }
        self.submit(Event::BookingRemoved { id }).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.memory.count())
    }
}

// ── Group-commit writer ──────────────────────────────────

/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One fsync for the whole batch.
/// 4. Apply the batch to memory in log order, then reply.
async fn wal_writer_loop(
    mut wal: Wal,
    memory: Arc<InMemoryStore>,
    mut rx: mpsc::Receiver<WalCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, &memory, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &memory, batch);
        if let Some(other) = deferred {
            handle_control(&mut wal, &memory, other);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, memory: &InMemoryStore, batch: Vec<(Event, Reply)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            for (event, tx) in batch {
                let _ = tx.send(apply_committed(memory, &event));
            }
            metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(memory.count() as f64);
        }
        Err(e) => {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
            for (_, tx) in batch {
                let _ = tx.send(Err(StoreError::Io(e.to_string())));
            }
        }
    }
}

fn write_batch(wal: &mut Wal, batch: &[(Event, Reply)]) -> io::Result<()> {
    wal.append_batch(batch.iter().map(|(event, _)| event))
}

fn apply_committed(memory: &InMemoryStore, event: &Event) -> Result<Option<Booking>, StoreError> {
    match event {
        Event::BookingCreated { booking } => {
            memory.put(*booking);
            Ok(Some(*booking))
        }
        Event::BookingReplaced { booking } => memory.overwrite(*booking).map(Some),
        Event::BookingRemoved { id } => Ok(memory.take(*id)),
        Event::IdWatermark { next_id } => {
            memory.bump_next_id(*next_id);
            Ok(None)
        }
    }
}

fn handle_control(wal: &mut Wal, memory: &InMemoryStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { event, response } => {
            commit_batch(wal, memory, vec![(event, response)]);
        }
        WalCommand::Compact { response } => {
            let live = memory.all();
            let mut events = Vec::with_capacity(live.len() + 1);
            events.push(Event::IdWatermark {
                next_id: memory.next_id(),
            });
            events.extend(live.iter().map(|b| Event::BookingCreated { booking: *b }));
            let result = wal
                .compact(&events)
                .map(|()| live.len())
                .map_err(StoreError::from);
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}
