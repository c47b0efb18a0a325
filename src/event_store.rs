use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::{try_unfold, BoxStream};
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::{
    Aggregate, AggregateRoot, Error, EventEnvelope, EventStream, InMemoryEventStore,
    SerializedEvent,
};

const DEFAULT_BATCH_SIZE: usize = 100;

/// The callback invoked by the [EventStore] for every appended envelope.
pub type Publisher = Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Boxes a closure into a [Publisher].
pub fn publisher<F, Fut>(publisher: F) -> Publisher
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |envelope| publisher(envelope).boxed())
}

/// A lazy sequence of envelope batches.
pub type EnvelopeBatches = BoxStream<'static, Result<Vec<EventEnvelope>, Error>>;

/// The storage side of an [EventStore].
///
/// Implementations only store and read envelopes: version checks, envelope minting and
/// publication are performed by the [EventStore] itself.
#[async_trait]
pub trait EventStoreBackend: Send + Sync {
    /// Opens the connection to the storage.
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Closes the connection to the storage.
    async fn disconnect(&self) -> Result<(), Error> {
        Ok(())
    }

    /// The number of envelopes persisted in the stream.
    async fn stream_version(&self, stream: &EventStream) -> Result<u64, Error>;

    /// Persists a batch of envelopes, all or nothing.
    ///
    /// Must fail with [Error::ConcurrencyConflict] if the stream version is not
    /// `expected_version` at the time of the write.
    async fn persist(
        &self,
        stream: &EventStream,
        expected_version: u64,
        envelopes: &[EventEnvelope],
    ) -> Result<(), Error>;

    /// Reads at most `limit` envelopes of a stream, in version order, starting at `from_version`
    /// included.
    async fn read_stream(
        &self,
        stream: &EventStream,
        from_version: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, Error>;

    /// Reads at most `limit` envelopes across all streams, in append order, among those matching
    /// the filter, skipping the first `offset` ones.
    async fn read_all(
        &self,
        filter: &PeriodFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, Error>;

    /// Finds an envelope by the id of its event.
    async fn find_envelope(&self, _event_id: Uuid) -> Result<Option<EventEnvelope>, Error> {
        Err(Error::Unsupported("find_envelope"))
    }
}

/// Metadata stamped on every envelope of an append.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AppendOptions {
    /// The correlation id of the append.
    pub correlation_id: Option<String>,
    /// The causation id of the append.
    pub causation_id: Option<String>,
}

impl AppendOptions {
    /// Sets the correlation id.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the causation id.
    pub fn causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}

/// Restricts the envelopes read from a stream.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReadFilter {
    /// The first version to read, included. Reads from the start of the stream if not set.
    pub from_version: Option<u64>,
    /// The maximum size of a batch. Uses the batch size of the store if not set.
    pub batch_size: Option<usize>,
}

impl ReadFilter {
    /// Reads from the given version, included.
    pub fn from_version(mut self, version: u64) -> Self {
        self.from_version = Some(version);
        self
    }

    /// Sets the maximum size of a batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Restricts the envelopes read across all streams to a period.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PeriodFilter {
    /// Lower bound of [occurred_on](EventEnvelope::occurred_on), included.
    pub from: Option<DateTime<Utc>>,
    /// Upper bound of [occurred_on](EventEnvelope::occurred_on), included.
    pub to: Option<DateTime<Utc>>,
    /// The maximum size of a batch. Uses the batch size of the store if not set.
    pub batch_size: Option<usize>,
}

impl PeriodFilter {
    /// Sets the lower bound.
    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the upper bound.
    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Sets the maximum size of a batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Returns `true` if the envelope occurred within the period.
    pub fn contains(&self, envelope: &EventEnvelope) -> bool {
        let occurred_on = envelope.occurred_on();
        self.from.map_or(true, |from| occurred_on >= from)
            && self.to.map_or(true, |to| occurred_on <= to)
    }
}

/// An append-only store of event streams with optimistic concurrency.
///
/// The store is the only place where [envelopes](EventEnvelope) are created. Every successful
/// [append](Self::append_events) is followed by the publication of the new envelopes, in version
/// order, through the registered [publisher](Self::set_publisher).
///
/// Storage is delegated to an [EventStoreBackend].
pub struct EventStore {
    backend: Arc<dyn EventStoreBackend>,
    publisher: RwLock<Option<Publisher>>,
    batch_size: usize,
}

impl EventStore {
    /// Creates a store over the given backend.
    pub fn new(backend: impl EventStoreBackend + 'static) -> Self {
        Self::shared(Arc::new(backend))
    }

    /// Creates a store over a backend the caller keeps a handle to.
    pub fn shared(backend: Arc<dyn EventStoreBackend>) -> Self {
        Self {
            backend,
            publisher: RwLock::new(None),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Creates a store backed by an [InMemoryEventStore].
    pub fn in_memory() -> Self {
        Self::new(InMemoryEventStore::default())
    }

    /// Sets the default size of the batches returned by reads. Takes ownership and returns the
    /// store to allow chaining.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The backend of the store.
    pub fn backend(&self) -> &dyn EventStoreBackend {
        self.backend.as_ref()
    }

    /// Connects the backend.
    pub async fn connect(&self) -> Result<(), Error> {
        self.backend.connect().await
    }

    /// Disconnects the backend.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.backend.disconnect().await
    }

    /// Sets the callback invoked for every appended envelope.
    ///
    /// An application sets it once, to forward envelopes to its event bus. Setting it again
    /// replaces the previous callback.
    pub fn set_publisher<F, Fut>(&self, publisher: F)
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed = self::publisher(publisher);
        let previous = self
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(boxed);
        if previous.is_some() {
            log::warn!("The publisher of the event store was replaced");
        }
    }

    /// Returns `true` if a publisher is set.
    pub fn has_publisher(&self) -> bool {
        self.publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The current version of a stream, which is the number of envelopes it contains.
    pub async fn stream_version(&self, stream: &EventStream) -> Result<u64, Error> {
        self.backend.stream_version(stream).await
    }

    /// Appends events to a stream and publishes the resulting envelopes.
    ///
    /// Fails with [Error::ConcurrencyConflict] if the version of the stream is not
    /// `expected_version`. The envelopes are numbered from `expected_version + 1`, in the order
    /// of `events`.
    pub async fn append_events(
        &self,
        stream: &EventStream,
        expected_version: u64,
        events: Vec<SerializedEvent>,
    ) -> Result<Vec<EventEnvelope>, Error> {
        self.append_events_with(stream, expected_version, events, AppendOptions::default())
            .await
    }

    /// Same as [append_events](Self::append_events), stamping the envelopes with the metadata of
    /// `options`.
    pub async fn append_events_with(
        &self,
        stream: &EventStream,
        expected_version: u64,
        events: Vec<SerializedEvent>,
        options: AppendOptions,
    ) -> Result<Vec<EventEnvelope>, Error> {
        let actual = self.backend.stream_version(stream).await?;
        if actual != expected_version {
            return Err(Error::ConcurrencyConflict {
                stream_id: stream.stream_id(),
                expected: expected_version,
                actual,
            });
        }

        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .zip(expected_version + 1..)
            .map(|(event, version)| {
                EventEnvelope::mint(
                    stream,
                    version,
                    event,
                    options.correlation_id.clone(),
                    options.causation_id.clone(),
                )
            })
            .collect();
        if envelopes.is_empty() {
            return Ok(envelopes);
        }

        self.backend
            .persist(stream, expected_version, &envelopes)
            .await?;
        self.publish(&envelopes).await;
        Ok(envelopes)
    }

    async fn publish(&self, envelopes: &[EventEnvelope]) {
        let publisher = self
            .publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match publisher {
            Some(publisher) => {
                for envelope in envelopes {
                    publisher(envelope.clone()).await;
                }
            }
            None => log::trace!(
                "{} envelope(s) appended with no publisher set",
                envelopes.len(),
            ),
        }
    }

    /// Reads a stream as a lazy sequence of batches, in version order.
    ///
    /// Nothing is read until the sequence is polled. Every call starts a new read.
    pub fn get_events(&self, stream: &EventStream, filter: ReadFilter) -> EnvelopeBatches {
        let backend = self.backend.clone();
        let stream = stream.clone();
        let batch_size = filter.batch_size.unwrap_or(self.batch_size).max(1);
        let from_version = filter.from_version.unwrap_or(1).max(1);

        try_unfold(Some(from_version), move |next| {
            read_stream_page(backend.clone(), stream.clone(), next, batch_size)
        })
        .boxed()
    }

    /// Reads the envelopes of all streams that occurred during a period, as a lazy sequence of
    /// batches in append order.
    pub fn get_all_envelopes(&self, filter: PeriodFilter) -> EnvelopeBatches {
        let backend = self.backend.clone();
        let batch_size = filter.batch_size.unwrap_or(self.batch_size).max(1);

        try_unfold(Some(0), move |next| read_all_page(backend.clone(), filter, next, batch_size))
            .boxed()
    }

    /// Reads all the envelopes of a stream.
    pub async fn get_envelopes(&self, stream: &EventStream) -> Result<Vec<EventEnvelope>, Error> {
        self.get_events(stream, ReadFilter::default())
            .try_concat()
            .await
    }

    /// Finds an envelope by the id of its event.
    pub async fn get_envelope(&self, event_id: Uuid) -> Result<Option<EventEnvelope>, Error> {
        self.backend.find_envelope(event_id).await
    }

    /// Finds an event by its id.
    pub async fn get_event(&self, event_id: Uuid) -> Result<Option<SerializedEvent>, Error> {
        Ok(self
            .get_envelope(event_id)
            .await?
            .map(EventEnvelope::into_event))
    }

    /// Rebuilds an aggregate from its stream.
    pub async fn load_aggregate<A: Aggregate>(
        &self,
        id: impl Into<String>,
    ) -> Result<AggregateRoot<A>, Error> {
        let mut root = AggregateRoot::new(id);
        let mut batches = self.get_events(&root.stream(), ReadFilter::default());
        while let Some(batch) = batches.try_next().await? {
            root.load_from_history(batch.into_iter().map(EventEnvelope::into_event));
        }
        Ok(root)
    }

    /// Appends the pending events of an aggregate, expecting the stream to be at the aggregate's
    /// committed version. The pending events are only cleared if the append succeeds.
    pub async fn save_aggregate<A: Aggregate>(
        &self,
        root: &mut AggregateRoot<A>,
        options: AppendOptions,
    ) -> Result<Vec<EventEnvelope>, Error> {
        let envelopes = self
            .append_events_with(
                &root.stream(),
                root.committed_version(),
                root.pending_events().to_vec(),
                options,
            )
            .await?;
        root.commit();
        Ok(envelopes)
    }
}

/// A batch and the position of the next one, if the batch was full.
type Page<P> = Option<(Vec<EventEnvelope>, Option<P>)>;

async fn read_stream_page(
    backend: Arc<dyn EventStoreBackend>,
    stream: EventStream,
    next: Option<u64>,
    batch_size: usize,
) -> Result<Page<u64>, Error> {
    let Some(from_version) = next else {
        return Ok(None);
    };
    let batch = backend
        .read_stream(&stream, from_version, batch_size)
        .await?;
    if batch.is_empty() {
        return Ok(None);
    }
    let next = match batch.last() {
        Some(last) if batch.len() == batch_size => Some(last.version() + 1),
        _ => None,
    };
    Ok(Some((batch, next)))
}

async fn read_all_page(
    backend: Arc<dyn EventStoreBackend>,
    filter: PeriodFilter,
    next: Option<usize>,
    batch_size: usize,
) -> Result<Page<usize>, Error> {
    let Some(offset) = next else {
        return Ok(None);
    };
    let batch = backend.read_all(&filter, offset, batch_size).await?;
    if batch.is_empty() {
        return Ok(None);
    }
    let next = (batch.len() == batch_size).then_some(offset + batch_size);
    Ok(Some((batch, next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Appliers, Event};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Serialize, Deserialize)]
    struct Incremented {
        by: u64,
    }

    impl Event for Incremented {
        const NAME: &'static str = "Incremented";
    }

    #[derive(Default)]
    struct Counter {
        value: u64,
    }

    impl Aggregate for Counter {
        const TYPE: &'static str = "Counter";

        fn appliers() -> Appliers<Self> {
            Appliers::new().on(|counter: &mut Counter, event: Incremented| {
                counter.value += event.by
            })
        }
    }

    fn events(count: u64) -> Vec<SerializedEvent> {
        (1..=count)
            .map(|by| SerializedEvent::new("Incremented", json!({ "by": by })))
            .collect()
    }

    fn recording_publisher(store: &EventStore) -> Arc<Mutex<Vec<u64>>> {
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        store.set_publisher(move |envelope| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(envelope.version()) }
        });
        published
    }

    #[tokio::test]
    async fn append_numbers_envelopes_after_expected_version() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");

        let first = store.append_events(&stream, 0, events(2)).await.unwrap();
        let second = store.append_events(&stream, 2, events(3)).await.unwrap();

        assert_eq!(
            first.iter().map(EventEnvelope::version).collect::<Vec<_>>(),
            vec![1, 2],
        );
        assert_eq!(
            second.iter().map(EventEnvelope::version).collect::<Vec<_>>(),
            vec![3, 4, 5],
        );
        assert!(second.iter().all(|envelope| envelope.aggregate_id() == "c1"));
        assert_eq!(store.stream_version(&stream).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn append_with_stale_version_is_a_conflict() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");

        store.append_events(&stream, 0, events(1)).await.unwrap();
        let result = store.append_events(&stream, 0, events(1)).await;

        match result {
            Err(Error::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            }) => {
                assert_eq!(stream_id, "Counter-c1");
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected a concurrency conflict, got {other:?}"),
        }
        assert_eq!(store.stream_version(&stream).await.unwrap(), 1);
        assert_eq!(store.backend().stream_version(&stream).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publisher_receives_each_envelope_once_in_order() {
        let store = EventStore::in_memory();
        let published = recording_publisher(&store);
        let stream = EventStream::new("Counter", "c1");

        store.append_events(&stream, 0, events(3)).await.unwrap();
        store.append_events(&stream, 3, events(1)).await.unwrap();

        assert_eq!(*published.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_append_publishes_nothing() {
        let store = EventStore::in_memory();
        let published = recording_publisher(&store);
        let stream = EventStream::new("Counter", "c1");

        let _ = store.append_events(&stream, 4, events(2)).await;

        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_stamps_options() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");

        let envelopes = store
            .append_events_with(
                &stream,
                0,
                events(2),
                AppendOptions::default()
                    .correlation_id("request-1")
                    .causation_id("command-1"),
            )
            .await
            .unwrap();

        for envelope in envelopes {
            assert_eq!(envelope.correlation_id(), Some("request-1"));
            assert_eq!(envelope.causation_id(), Some("command-1"));
        }
    }

    #[tokio::test]
    async fn get_events_yields_batches_in_order_and_restarts() {
        let store = EventStore::in_memory().with_batch_size(2);
        let stream = EventStream::new("Counter", "c1");
        store.append_events(&stream, 0, events(5)).await.unwrap();

        for _ in 0..2 {
            let batches: Vec<Vec<EventEnvelope>> = store
                .get_events(&stream, ReadFilter::default())
                .try_collect()
                .await
                .unwrap();
            let versions: Vec<Vec<u64>> = batches
                .iter()
                .map(|batch| batch.iter().map(EventEnvelope::version).collect())
                .collect();
            assert_eq!(versions, vec![vec![1, 2], vec![3, 4], vec![5]]);
        }
    }

    #[tokio::test]
    async fn get_events_from_version_is_inclusive() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");
        store.append_events(&stream, 0, events(4)).await.unwrap();

        let envelopes: Vec<EventEnvelope> = store
            .get_events(&stream, ReadFilter::default().from_version(3).batch_size(10))
            .try_concat()
            .await
            .unwrap();

        assert_eq!(
            envelopes.iter().map(EventEnvelope::version).collect::<Vec<_>>(),
            vec![3, 4],
        );
    }

    #[tokio::test]
    async fn get_events_of_unknown_stream_is_empty() {
        let store = EventStore::in_memory();

        let envelopes = store
            .get_envelopes(&EventStream::new("Counter", "nope"))
            .await
            .unwrap();

        assert!(envelopes.is_empty());
    }

    #[tokio::test]
    async fn get_all_envelopes_spans_streams_in_append_order() {
        let store = EventStore::in_memory();
        let first = EventStream::new("Counter", "c1");
        let second = EventStream::new("Counter", "c2");
        store.append_events(&first, 0, events(2)).await.unwrap();
        store.append_events(&second, 0, events(1)).await.unwrap();
        store.append_events(&first, 2, events(1)).await.unwrap();

        let batches: Vec<Vec<EventEnvelope>> = store
            .get_all_envelopes(PeriodFilter::default().batch_size(3))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 2);
        let streams: Vec<(String, u64)> = batches
            .concat()
            .iter()
            .map(|envelope| (envelope.aggregate_id().to_owned(), envelope.version()))
            .collect();
        assert_eq!(
            streams,
            vec![
                ("c1".to_owned(), 1),
                ("c1".to_owned(), 2),
                ("c2".to_owned(), 1),
                ("c1".to_owned(), 3),
            ],
        );
    }

    #[tokio::test]
    async fn get_all_envelopes_respects_period() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");
        store.append_events(&stream, 0, events(2)).await.unwrap();
        let after = Utc::now() + chrono::Duration::minutes(1);

        let envelopes = store
            .get_all_envelopes(PeriodFilter::default().from(after))
            .try_concat()
            .await
            .unwrap();

        assert!(envelopes.is_empty());
    }

    #[tokio::test]
    async fn point_lookups() {
        let store = EventStore::in_memory();
        let stream = EventStream::new("Counter", "c1");
        let envelopes = store.append_events(&stream, 0, events(2)).await.unwrap();

        let found = store
            .get_envelope(envelopes[1].event_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, envelopes[1]);

        let event = store
            .get_event(envelopes[0].event_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload(), &json!({ "by": 1 }));

        assert!(store.get_envelope(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_aggregate() {
        let store = EventStore::in_memory();

        let mut counter = store.load_aggregate::<Counter>("c1").await.unwrap();
        counter.record(Incremented { by: 2 }).unwrap();
        counter.record(Incremented { by: 3 }).unwrap();
        store
            .save_aggregate(&mut counter, AppendOptions::default())
            .await
            .unwrap();
        assert!(counter.pending_events().is_empty());

        let counter = store.load_aggregate::<Counter>("c1").await.unwrap();
        assert_eq!(counter.version(), 2);
        assert_eq!(counter.state().value, 5);
    }

    #[tokio::test]
    async fn conflicting_save_keeps_pending_events() {
        let store = EventStore::in_memory();
        let mut first = store.load_aggregate::<Counter>("c1").await.unwrap();
        let mut second = store.load_aggregate::<Counter>("c1").await.unwrap();

        first.record(Incremented { by: 1 }).unwrap();
        store
            .save_aggregate(&mut first, AppendOptions::default())
            .await
            .unwrap();

        second.record(Incremented { by: 1 }).unwrap();
        let error = store
            .save_aggregate(&mut second, AppendOptions::default())
            .await
            .unwrap_err();

        assert!(error.is_concurrency_conflict());
        assert_eq!(second.pending_events().len(), 1);
    }

    struct FailingBackend;

    #[async_trait]
    impl EventStoreBackend for FailingBackend {
        async fn stream_version(&self, _: &EventStream) -> Result<u64, Error> {
            Ok(0)
        }

        async fn persist(&self, _: &EventStream, _: u64, _: &[EventEnvelope]) -> Result<(), Error> {
            Err(Error::storage("disk full"))
        }

        async fn read_stream(
            &self,
            _: &EventStream,
            _: u64,
            _: usize,
        ) -> Result<Vec<EventEnvelope>, Error> {
            Ok(Vec::new())
        }

        async fn read_all(
            &self,
            _: &PeriodFilter,
            _: usize,
            _: usize,
        ) -> Result<Vec<EventEnvelope>, Error> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn backend_errors_propagate_and_skip_publication() {
        let store = EventStore::new(FailingBackend);
        let published = recording_publisher(&store);

        let result = store
            .append_events(&EventStream::new("Counter", "c1"), 0, events(1))
            .await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(published.lock().unwrap().is_empty());
        assert!(matches!(
            store.get_envelope(Uuid::new_v4()).await,
            Err(Error::Unsupported(_)),
        ));
    }
}
