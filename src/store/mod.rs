//! Booking persistence.
//!
//! The reservation service only ever talks to [`BookingRepository`]; the
//! in-memory arena and the WAL-backed store are interchangeable behind it.
//! Every operation either fully applies or has no observable effect.

mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::model::*;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// All bookings, ordered by id.
    async fn get_all(&self) -> Result<Vec<Booking>, StoreError>;

    async fn get_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Bookings on one resource, ordered by period start.
    async fn get_by_resource(&self, resource_id: ResourceId) -> Result<Vec<Booking>, StoreError>;

    /// Assign a fresh id (monotonic from 1, never reused) and store.
    async fn insert(&self, new: NewBooking) -> Result<Booking, StoreError>;

    /// Overwrite every field but the id. `NotFound` if `id` is absent.
    async fn replace(&self, id: BookingId, new: NewBooking) -> Result<Booking, StoreError>;

    async fn remove(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(BookingId),
    Io(String),
    WriterGone,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Io(e) => write!(f, "WAL error: {e}"),
            StoreError::WriterGone => write!(f, "WAL writer shut down"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
