use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::mem;

use crate::{Error, Event, EventStream, SerializedEvent};

/// An aggregate represent a business entity whose state is derived solely from its own ordered
/// events.
///
/// The state is rebuilt by applying each event, in order, with the routine registered for the
/// event name in [appliers()](Self::appliers). Domain rules are checked before events are
/// recorded: applying an event never fails.
///
/// # Associated constant
///
/// * [TYPE](Self::TYPE) - the name of the aggregate type, used to identify its streams
///
/// # Example
/// ```
/// use strata::{Aggregate, Appliers, Event};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Deposited {
///     amount: u64,
/// }
///
/// impl Event for Deposited {
///     const NAME: &'static str = "Deposited";
/// }
///
/// #[derive(Default)]
/// struct Account {
///     balance: u64,
/// }
///
/// impl Aggregate for Account {
///     const TYPE: &'static str = "Account";
///
///     fn appliers() -> Appliers<Self> {
///         Appliers::new().on(|account: &mut Account, event: Deposited| {
///             account.balance += event.amount
///         })
///     }
/// }
/// ```
pub trait Aggregate: Default + Send + Sync + 'static {
    /// The name of the aggregate type.
    const TYPE: &'static str;

    /// The state-update routines of the aggregate, keyed by event name.
    fn appliers() -> Appliers<Self>;
}

type Applier<A> = Box<dyn Fn(&mut A, &SerializedEvent) + Send + Sync>;

/// Maps event names to the routines that apply them to the state of an [Aggregate].
pub struct Appliers<A> {
    appliers: HashMap<&'static str, Applier<A>>,
}

impl<A: 'static> Appliers<A> {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// Registers the routine applying events of type `E`. Takes ownership and returns the mapping
    /// to allow chaining.
    ///
    /// The payload is deserialized before the routine is called. A payload that cannot be
    /// deserialized leaves the state untouched.
    pub fn on<E, F>(mut self, apply: F) -> Self
    where
        E: Event,
        F: Fn(&mut A, E) + Send + Sync + 'static,
    {
        self.appliers.insert(
            E::NAME,
            Box::new(move |state, event| match event.deserialize::<E>() {
                Ok(event) => apply(state, event),
                Err(error) => log::warn!(
                    "Could not apply event {}, its payload does not deserialize: {error}",
                    E::NAME,
                ),
            }),
        );
        self
    }

    /// Returns `true` if a routine is registered for the event name.
    pub fn handles(&self, event_name: &str) -> bool {
        self.appliers.contains_key(event_name)
    }

    fn apply(&self, state: &mut A, event: &SerializedEvent) -> bool {
        match self.appliers.get(event.name()) {
            Some(applier) => {
                applier(state, event);
                true
            }
            None => false,
        }
    }
}

impl<A: 'static> Default for Appliers<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// An instance of an [Aggregate] with its version and the events recorded since the last commit.
///
/// The version is the number of events applied since construction, whether they were replayed
/// from history or newly recorded.
pub struct AggregateRoot<A> {
    id: String,
    version: u64,
    state: A,
    pending: Vec<SerializedEvent>,
    appliers: Appliers<A>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a root at version 0 with the default state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            state: A::default(),
            pending: Vec::new(),
            appliers: A::appliers(),
        }
    }

    /// Creates a root and replays the given events.
    pub fn from_history(
        id: impl Into<String>,
        events: impl IntoIterator<Item = SerializedEvent>,
    ) -> Self {
        let mut root = Self::new(id);
        root.load_from_history(events);
        root
    }

    /// The id of the aggregate.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The number of events applied since construction.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The version of the aggregate before the pending events, which is the version the stream is
    /// expected to have when they are appended.
    pub fn committed_version(&self) -> u64 {
        self.version - self.pending.len() as u64
    }

    /// The current state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// The stream of the aggregate.
    pub fn stream(&self) -> EventStream {
        EventStream::new(A::TYPE, &self.id)
    }

    /// The events applied since the last [commit](Self::commit).
    pub fn pending_events(&self) -> &[SerializedEvent] {
        &self.pending
    }

    /// Applies an event to the state and increments the version.
    ///
    /// Unless `from_history` is set, the event is also buffered until the next
    /// [commit](Self::commit). An event with no registered routine is ignored but still counts
    /// towards the version.
    pub fn apply_event(&mut self, event: SerializedEvent, from_history: bool) {
        self.version += 1;
        if !self.appliers.apply(&mut self.state, &event) {
            log::trace!(
                "Aggregate {} ignored event {} with no applier",
                A::TYPE,
                event.name(),
            );
        }
        if !from_history {
            self.pending.push(event);
        }
    }

    /// Serializes a new event and applies it.
    pub fn record<E: Event>(&mut self, event: E) -> Result<(), Error> {
        self.apply_event(event.into_serialized()?, false);
        Ok(())
    }

    /// Replays events, in order, without buffering them.
    pub fn load_from_history(&mut self, events: impl IntoIterator<Item = SerializedEvent>) {
        for event in events {
            self.apply_event(event, true);
        }
    }

    /// Returns the pending events and clears the buffer.
    pub fn commit(&mut self) -> Vec<SerializedEvent> {
        mem::take(&mut self.pending)
    }
}

impl<A: Debug> Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Deposited {
        amount: u64,
    }

    impl Event for Deposited {
        const NAME: &'static str = "Deposited";
    }

    #[derive(Serialize, Deserialize)]
    struct Withdrawn {
        amount: u64,
    }

    impl Event for Withdrawn {
        const NAME: &'static str = "Withdrawn";
    }

    #[derive(Debug, Default, PartialEq)]
    struct Wallet {
        balance: i64,
        operations: Vec<i64>,
    }

    impl Aggregate for Wallet {
        const TYPE: &'static str = "Wallet";

        fn appliers() -> Appliers<Self> {
            Appliers::new()
                .on(|wallet: &mut Wallet, event: Deposited| {
                    wallet.balance += event.amount as i64;
                    wallet.operations.push(event.amount as i64);
                })
                .on(|wallet: &mut Wallet, event: Withdrawn| {
                    wallet.balance -= event.amount as i64;
                    wallet.operations.push(-(event.amount as i64));
                })
        }
    }

    fn history() -> Vec<SerializedEvent> {
        vec![
            SerializedEvent::new("Deposited", json!({ "amount": 10 })),
            SerializedEvent::new("Withdrawn", json!({ "amount": 3 })),
            SerializedEvent::new("Deposited", json!({ "amount": 5 })),
        ]
    }

    #[test]
    fn replay_sets_version_and_leaves_nothing_pending() {
        let mut wallet = AggregateRoot::<Wallet>::from_history("w1", history());

        assert_eq!(wallet.version(), 3);
        assert_eq!(wallet.committed_version(), 3);
        assert_eq!(wallet.state().balance, 12);
        assert!(wallet.commit().is_empty());
    }

    #[test]
    fn replay_of_empty_history() {
        let mut wallet = AggregateRoot::<Wallet>::from_history("w1", Vec::new());

        assert_eq!(wallet.version(), 0);
        assert_eq!(wallet.state(), &Wallet::default());
        assert!(wallet.commit().is_empty());
    }

    #[test]
    fn commit_returns_new_events_in_order_then_nothing() {
        let mut wallet = AggregateRoot::<Wallet>::from_history("w1", history());

        wallet.record(Deposited { amount: 1 }).unwrap();
        wallet.record(Withdrawn { amount: 2 }).unwrap();

        assert_eq!(wallet.version(), 5);
        assert_eq!(wallet.committed_version(), 3);
        assert_eq!(wallet.pending_events().len(), 2);

        let committed = wallet.commit();
        assert_eq!(
            committed.iter().map(SerializedEvent::name).collect::<Vec<_>>(),
            vec!["Deposited", "Withdrawn"],
        );
        assert!(wallet.commit().is_empty());
        assert_eq!(wallet.committed_version(), 5);
    }

    #[test]
    fn replay_is_deterministic() {
        let first = AggregateRoot::<Wallet>::from_history("w1", history());
        let second = AggregateRoot::<Wallet>::from_history("w1", history());

        assert_eq!(first.state(), second.state());
        assert_eq!(first.state().operations, vec![10, -3, 5]);
    }

    #[test]
    fn unknown_event_is_ignored_but_counted() {
        let mut wallet = AggregateRoot::<Wallet>::new("w1");

        wallet.apply_event(SerializedEvent::new("Frozen", json!({})), false);

        assert_eq!(wallet.version(), 1);
        assert_eq!(wallet.state(), &Wallet::default());
        assert_eq!(wallet.commit().len(), 1);
    }

    #[test]
    fn undeserializable_payload_leaves_state_unchanged() {
        let mut wallet = AggregateRoot::<Wallet>::new("w1");

        wallet.apply_event(
            SerializedEvent::new("Deposited", json!({ "amount": "ten" })),
            true,
        );

        assert_eq!(wallet.version(), 1);
        assert_eq!(wallet.state().balance, 0);
    }

    #[test]
    fn stream_uses_aggregate_type() {
        let wallet = AggregateRoot::<Wallet>::new("w1");

        assert_eq!(wallet.stream().stream_id(), "Wallet-w1");
        assert!(Wallet::appliers().handles("Withdrawn"));
    }
}
