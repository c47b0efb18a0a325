use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{Error, Event, EventEnvelope, Publisher};

/// The callback receiving the errors returned by [event handlers](EventHandler), together with
/// the envelope that was being handled.
pub type ErrorHandler<E> = Arc<dyn Fn(&E, &EventEnvelope) + Send + Sync>;

/// Reacts to published [envelopes](EventEnvelope).
///
/// Errors returned by an event handler never reach the publisher of the envelope: they are
/// routed to the [error handler](EventBus::set_error_handler) of the bus.
///
/// # Type arguments
///
/// * `E` - the type of errors returned if the handler fails
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// Handles an envelope.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), E>;
}

/// Delivers envelopes to the handlers subscribed to their event name.
///
/// The failure of one handler never prevents the delivery to the others, nor fails the
/// publication.
#[async_trait]
pub trait EventBus<E>: Send + Sync {
    /// Subscribes a handler to the events named `topic`.
    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler<E>>) -> Subscription;

    /// Subscribes a handler to every event.
    fn subscribe_all(&self, handler: Arc<dyn EventHandler<E>>) -> Subscription;

    /// Subscribes a handler to several topics. The returned subscription cancels all of them.
    fn subscribe_to_many(
        &self,
        topics: &[&str],
        handler: Arc<dyn EventHandler<E>>,
    ) -> Subscription {
        topics
            .iter()
            .map(|topic| self.subscribe(topic, handler.clone()))
            .collect()
    }

    /// Delivers an envelope to the handlers of its topic, to the handlers subscribed to every
    /// event and to the registered publishers.
    async fn publish(&self, envelope: &EventEnvelope);

    /// Registers a publisher that receives every envelope, for instance to forward them to an
    /// external broker.
    fn add_publisher(&self, publisher: Publisher);

    /// Sets the callback receiving handler errors, replacing the previous one.
    fn set_error_handler(&self, handler: ErrorHandler<E>);

    /// The number of handlers subscribed to `topic`, or the number of subscriptions of all kinds
    /// if no topic is given.
    fn subscriber_count(&self, topic: Option<&str>) -> usize;

    /// The topics having at least one handler, sorted.
    fn registered_events(&self) -> Vec<String>;

    /// Removes every subscription. Publishers and the error handler are kept.
    fn clear(&self);
}

/// The handle returned when subscribing to an [EventBus].
///
/// Dropping a subscription does not unsubscribe the handler: call
/// [unsubscribe](Self::unsubscribe) for that.
#[must_use = "dropping a subscription keeps the handler subscribed"]
pub struct Subscription {
    unsubscribe: Box<dyn FnOnce() + Send + Sync>,
}

impl Subscription {
    /// Creates a subscription running `unsubscribe` when cancelled.
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Box::new(unsubscribe),
        }
    }

    /// A subscription that does nothing when cancelled.
    pub fn empty() -> Self {
        Self::new(|| {})
    }

    /// Cancels the subscription.
    pub fn unsubscribe(self) {
        (self.unsubscribe)()
    }
}

impl FromIterator<Subscription> for Subscription {
    fn from_iter<T: IntoIterator<Item = Subscription>>(iter: T) -> Self {
        let subscriptions: Vec<Subscription> = iter.into_iter().collect();
        Self::new(move || subscriptions.into_iter().for_each(Subscription::unsubscribe))
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// An [EventHandler] calling a closure with a copy of the envelope.
pub struct FnEventHandler<F> {
    handler: F,
}

/// Creates an [EventHandler] from an async closure receiving the envelope.
///
/// # Example
///
/// ```
/// let handler = strata::event_handler(|envelope: strata::EventEnvelope| async move {
///     println!("{} happened", envelope.event_name());
///     Ok::<(), strata::Error>(())
/// });
/// ```
pub fn event_handler<F, Fut, E>(handler: F) -> FnEventHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    FnEventHandler { handler }
}

#[async_trait]
impl<F, Fut, E> EventHandler<E> for FnEventHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: 'static,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), E> {
        (self.handler)(envelope.clone()).await
    }
}

/// An [EventHandler] deserializing the envelope into an [Event] before calling a closure.
pub struct TypedEventHandler<T, F> {
    handler: F,
    event: PhantomData<fn(T)>,
}

/// Creates an [EventHandler] from an async closure receiving the deserialized event and its
/// envelope. A payload that cannot be deserialized is reported as a handler error.
pub fn typed_event_handler<T, F, Fut, E>(handler: F) -> TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<Error>,
{
    TypedEventHandler {
        handler,
        event: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut, E> EventHandler<E> for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<Error> + 'static,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), E> {
        let event = envelope.deserialize::<T>()?;
        (self.handler)(event, envelope.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_collects_unsubscribe_actions() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let subscription: Subscription = (0..3)
            .map(|_| {
                let cancelled = cancelled.clone();
                Subscription::new(move || {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
        subscription.unsubscribe();
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_subscription_can_be_collected_and_cancelled() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let subscription: Subscription = [
            Subscription::empty(),
            Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ]
        .into_iter()
        .collect();

        subscription.unsubscribe();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_subscription_does_not_cancel_it() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();

        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }
}
