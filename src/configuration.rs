use std::future::Future;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use crate::{
    command_handler, query_handler, typed_event_handler, Command, CommandHandler, Error, Event,
    EventEnvelope, EventHandler, Query, QueryHandler,
};

/// What an event handler of a [Configuration] subscribes to.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Topic {
    /// Events with this name.
    Named(String),
    /// Every event.
    All,
}

/// The handlers provided by a [Module](crate::Module).
///
/// Implements [Add] and [AddAssign] for composition of multiple configurations.
pub struct Configuration<E> {
    pub(crate) command_handlers: Vec<Arc<dyn CommandHandler<E>>>,
    pub(crate) query_handlers: Vec<Arc<dyn QueryHandler<E>>>,
    pub(crate) event_handlers: Vec<(Topic, Arc<dyn EventHandler<E>>)>,
}

impl<E> Configuration<E> {
    /// Creates a new empty [Configuration].
    pub fn new() -> Self {
        Self {
            command_handlers: Vec::new(),
            query_handlers: Vec::new(),
            event_handlers: Vec::new(),
        }
    }

    /// The names of the commands handled by the configuration, in registration order. A name
    /// appears twice if two handlers were added for it.
    pub fn command_names(&self) -> Vec<&'static str> {
        self.command_handlers
            .iter()
            .map(|handler| handler.command_name())
            .collect()
    }

    /// The names of the queries handled by the configuration, in registration order.
    pub fn query_names(&self) -> Vec<&'static str> {
        self.query_handlers
            .iter()
            .map(|handler| handler.query_name())
            .collect()
    }

    /// The topics of the event handlers, in registration order.
    pub fn topics(&self) -> Vec<&Topic> {
        self.event_handlers.iter().map(|(topic, _)| topic).collect()
    }

    /// Returns `true` if the configuration has no handler.
    pub fn is_empty(&self) -> bool {
        self.command_handlers.is_empty()
            && self.query_handlers.is_empty()
            && self.event_handlers.is_empty()
    }
}

impl<E: 'static> Configuration<E> {
    /// Adds a new command handler to the configuration. Takes ownership and returns the
    /// configuration to allow chaining.
    pub fn command_handler(mut self, handler: impl CommandHandler<E> + 'static) -> Self {
        self.command_handlers.push(Arc::new(handler));
        self
    }

    /// Adds a new query handler to the configuration. Takes ownership and returns the
    /// configuration to allow chaining.
    pub fn query_handler(mut self, handler: impl QueryHandler<E> + 'static) -> Self {
        self.query_handlers.push(Arc::new(handler));
        self
    }

    /// Subscribes an event handler to the events named `topic`. Takes ownership and returns the
    /// configuration to allow chaining.
    pub fn event_handler(
        mut self,
        topic: impl Into<String>,
        handler: impl EventHandler<E> + 'static,
    ) -> Self {
        self.event_handlers
            .push((Topic::Named(topic.into()), Arc::new(handler)));
        self
    }

    /// Subscribes one event handler to several topics.
    pub fn event_handler_for(
        mut self,
        topics: &[&str],
        handler: impl EventHandler<E> + 'static,
    ) -> Self {
        let handler: Arc<dyn EventHandler<E>> = Arc::new(handler);
        self.event_handlers.extend(
            topics
                .iter()
                .map(|topic| (Topic::Named((*topic).to_owned()), handler.clone())),
        );
        self
    }

    /// Subscribes an event handler to every event.
    pub fn all_events_handler(mut self, handler: impl EventHandler<E> + 'static) -> Self {
        self.event_handlers.push((Topic::All, Arc::new(handler)));
        self
    }
}

impl<E> Configuration<E>
where
    E: From<Error> + 'static,
{
    /// Handles the command `C` with an async closure.
    pub fn command<C, F, Fut>(self, handler: F) -> Self
    where
        C: Command,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C::Output, E>> + Send + 'static,
    {
        self.command_handler(command_handler::<C, F, Fut, E>(handler))
    }

    /// Handles the query `Q` with an async closure.
    pub fn query<Q, F, Fut>(self, handler: F) -> Self
    where
        Q: Query,
        F: Fn(Q) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Q::Output, E>> + Send + 'static,
    {
        self.query_handler(query_handler::<Q, F, Fut, E>(handler))
    }

    /// Reacts to the event `T` with an async closure receiving the deserialized event and its
    /// envelope.
    pub fn on<T, F, Fut>(self, handler: F) -> Self
    where
        T: Event,
        F: Fn(T, EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.event_handler(T::NAME, typed_event_handler::<T, F, Fut, E>(handler))
    }
}

impl<E> Default for Configuration<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Add for Configuration<E> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl<E> AddAssign for Configuration<E> {
    fn add_assign(&mut self, rhs: Self) {
        self.command_handlers.extend(rhs.command_handlers);
        self.query_handlers.extend(rhs.query_handlers);
        self.event_handlers.extend(rhs.event_handlers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_handler;
    use serde::{Deserialize, Serialize};

    struct Open;

    impl Command for Open {
        const NAME: &'static str = "Open";
        type Output = ();
    }

    struct Count;

    impl Query for Count {
        const NAME: &'static str = "Count";
        type Output = usize;
    }

    #[derive(Serialize, Deserialize)]
    struct Opened;

    impl Event for Opened {
        const NAME: &'static str = "Opened";
    }

    fn noop() -> impl EventHandler<Error> {
        event_handler(|_: EventEnvelope| async { Ok::<(), Error>(()) })
    }

    #[test]
    fn test_add_assign() {
        let mut configuration = Configuration::<Error>::default()
            .command(|_: Open| async { Ok(()) })
            .event_handler("Opened", noop());

        configuration += Configuration::<Error>::default()
            .query(|_: Count| async { Ok(0) })
            .on(|_: Opened, _| async { Ok(()) })
            .all_events_handler(noop());

        assert_eq!(configuration.command_names(), vec!["Open"]);
        assert_eq!(configuration.query_names(), vec!["Count"]);
        assert_eq!(
            configuration.topics(),
            vec![
                &Topic::Named("Opened".into()),
                &Topic::Named("Opened".into()),
                &Topic::All,
            ],
        );
    }

    #[test]
    fn duplicates_are_kept_for_composition_checks() {
        let configuration = Configuration::<Error>::default()
            .command(|_: Open| async { Ok(()) })
            + Configuration::<Error>::default().command(|_: Open| async { Ok(()) });

        assert_eq!(configuration.command_names(), vec!["Open", "Open"]);
    }

    #[test]
    fn one_handler_for_many_topics() {
        let configuration: Configuration<Error> =
            Configuration::new().event_handler_for(&["Opened", "Closed"], noop());

        assert_eq!(configuration.topics().len(), 2);
        assert!(!configuration.is_empty());
        assert!(Configuration::<Error>::new().is_empty());
    }
}
