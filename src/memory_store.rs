use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::{Error, EventEnvelope, EventStoreBackend, EventStream, PeriodFilter};

/// An [EventStoreBackend] keeping every envelope in memory.
///
/// Intended for tests and demos: nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    storage: Mutex<Storage>,
    connected: AtomicBool,
}

#[derive(Debug, Default)]
struct Storage {
    streams: HashMap<EventStream, Vec<EventEnvelope>>,
    log: Vec<EventEnvelope>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` between a call to `connect` and a call to `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The number of envelopes across all streams.
    pub fn len(&self) -> usize {
        self.storage().log.len()
    }

    /// Returns `true` if no envelope was ever appended.
    pub fn is_empty(&self) -> bool {
        self.storage().log.is_empty()
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventStoreBackend for InMemoryEventStore {
    async fn connect(&self) -> Result<(), Error> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stream_version(&self, stream: &EventStream) -> Result<u64, Error> {
        Ok(self
            .storage()
            .streams
            .get(stream)
            .map_or(0, |envelopes| envelopes.len() as u64))
    }

    async fn persist(
        &self,
        stream: &EventStream,
        expected_version: u64,
        envelopes: &[EventEnvelope],
    ) -> Result<(), Error> {
        let mut storage = self.storage();
        let actual = storage
            .streams
            .get(stream)
            .map_or(0, |envelopes| envelopes.len() as u64);
        if actual != expected_version {
            return Err(Error::ConcurrencyConflict {
                stream_id: stream.stream_id(),
                expected: expected_version,
                actual,
            });
        }
        storage
            .streams
            .entry(stream.clone())
            .or_default()
            .extend_from_slice(envelopes);
        storage.log.extend_from_slice(envelopes);
        Ok(())
    }

    async fn read_stream(
        &self,
        stream: &EventStream,
        from_version: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, Error> {
        let storage = self.storage();
        let Some(envelopes) = storage.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let skip = from_version.saturating_sub(1) as usize;
        Ok(envelopes.iter().skip(skip).take(limit).cloned().collect())
    }

    async fn read_all(
        &self,
        filter: &PeriodFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, Error> {
        Ok(self
            .storage()
            .log
            .iter()
            .filter(|envelope| filter.contains(envelope))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_envelope(&self, event_id: Uuid) -> Result<Option<EventEnvelope>, Error> {
        Ok(self
            .storage()
            .log
            .iter()
            .find(|envelope| envelope.event_id() == event_id)
            .cloned())
    }
}
