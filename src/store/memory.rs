use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::*;

use super::{BookingRepository, StoreError};

/// Arena of bookings keyed by id, plus a per-resource index.
///
/// Lock order is always arena shard, then index shard.
pub struct InMemoryStore {
    bookings: DashMap<BookingId, Booking>,
    /// resource → `(period.start, id)`, kept sorted.
    by_resource: DashMap<ResourceId, Vec<(Ms, BookingId)>>,
    next_id: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_resource: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    // ── Id counter ───────────────────────────────────────────

    /// Hand out the next id. Burnt ids are never handed out again.
    pub fn reserve_id(&self) -> BookingId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_id(&self) -> BookingId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Raise the counter to at least `next_id`; never lowers it.
    pub fn bump_next_id(&self, next_id: BookingId) {
        self.next_id.fetch_max(next_id, Ordering::SeqCst);
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn count(&self) -> usize {
        self.bookings.len()
    }

    pub fn get(&self, id: BookingId) -> Option<Booking> {
        self.bookings.get(&id).map(|e| *e.value())
    }

    pub fn all(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| *e.value()).collect();
        all.sort_by_key(|b| b.id);
        all
    }

    pub fn for_resource(&self, resource_id: ResourceId) -> Vec<Booking> {
        let ids: Vec<BookingId> = self
            .by_resource
            .get(&resource_id)
            .map(|e| e.value().iter().map(|(_, id)| *id).collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.get(id))
            // A booking moving between resources may briefly sit in the old bucket.
            .filter(|b| b.resource_id == resource_id)
            .collect()
    }

    // ── Writes ───────────────────────────────────────────────

    /// Store a booking under its own id (used for inserts and WAL replay).
    pub fn put(&self, booking: Booking) {
        if let Some(previous) = self.bookings.insert(booking.id, booking) {
            self.unindex(&previous);
        }
        self.index(&booking);
        self.bump_next_id(booking.id + 1);
    }

    pub fn overwrite(&self, booking: Booking) -> Result<Booking, StoreError> {
        let mut entry = self
            .bookings
            .get_mut(&booking.id)
            .ok_or(StoreError::NotFound(booking.id))?;
        let previous = *entry.value();
        *entry.value_mut() = booking;
        if previous.resource_id != booking.resource_id
            || previous.period.start != booking.period.start
        {
            self.unindex(&previous);
            self.index(&booking);
        }
        Ok(booking)
    }

    pub fn take(&self, id: BookingId) -> Option<Booking> {
        let (_, removed) = self.bookings.remove(&id)?;
        self.unindex(&removed);
        Some(removed)
    }

    /// Apply a WAL event to in-memory state.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => self.put(*booking),
            Event::BookingReplaced { booking } => {
                // A replace that raced a remove is logged but was never applied.
                if self.overwrite(*booking).is_err() {
                    tracing::debug!("skipping replace of removed booking {}", booking.id);
                }
            }
            Event::BookingRemoved { id } => {
                self.take(*id);
            }
            Event::IdWatermark { next_id } => self.bump_next_id(*next_id),
        }
    }

    // ── Resource index ───────────────────────────────────────

    fn index(&self, booking: &Booking) {
        let key = (booking.period.start, booking.id);
        let mut bucket = self.by_resource.entry(booking.resource_id).or_default();
        let pos = bucket.binary_search(&key).unwrap_or_else(|e| e);
        bucket.insert(pos, key);
    }

    fn unindex(&self, booking: &Booking) {
        if let Some(mut bucket) = self.by_resource.get_mut(&booking.resource_id) {
            bucket.retain(|(_, id)| *id != booking.id);
        }
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn get_all(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self.all())
    }

    async fn get_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.get(id))
    }

    async fn get_by_resource(&self, resource_id: ResourceId) -> Result<Vec<Booking>, StoreError> {
        Ok(self.for_resource(resource_id))
    }

    async fn insert(&self, new: NewBooking) -> Result<Booking, StoreError> {
        let booking = Booking::from_new(self.reserve_id(), new);
        self.put(booking);
        Ok(booking)
    }

    async fn replace(&self, id: BookingId, new: NewBooking) -> Result<Booking, StoreError> {
        self.overwrite(Booking::from_new(id, new))
    }

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.take(id))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.count())
    }
}
