use async_trait::async_trait;
use futures_util::future::{join, join_all};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::{ErrorHandler, EventBus, EventEnvelope, EventHandler, Publisher, Subscription};

type Entry<E> = (u64, Arc<dyn EventHandler<E>>);

/// The reference [EventBus], delivering envelopes within the process.
///
/// All the handlers of a publication are started before any of them completes. A handler
/// returning an error is reported to the error handler, or logged at the debug level if none is
/// set. A handler that panics is logged at the error level.
pub struct InMemoryEventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

struct Registry<E> {
    next_id: u64,
    topics: HashMap<String, Vec<Entry<E>>>,
    wildcard: Vec<Entry<E>>,
    publishers: Vec<Publisher>,
    on_error: Option<ErrorHandler<E>>,
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            topics: HashMap::new(),
            wildcard: Vec::new(),
            publishers: Vec::new(),
            on_error: None,
        }
    }
}

impl<E> Registry<E> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, topic: Option<&str>, id: u64) {
        match topic {
            Some(topic) => {
                if let Some(entries) = self.topics.get_mut(topic) {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                    if entries.is_empty() {
                        self.topics.remove(topic);
                    }
                }
            }
            None => self.wildcard.retain(|(entry_id, _)| *entry_id != id),
        }
    }
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: 'static> InMemoryEventBus<E> {
    /// Creates a bus with no subscription.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry<E>> {
        lock(&self.registry)
    }

    fn unsubscribe_action(&self, topic: Option<String>, id: u64) -> Subscription {
        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).remove(topic.as_deref(), id);
            }
        })
    }
}

impl<E: 'static> Default for InMemoryEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryEventBus<E>
where
    E: Debug + Send + 'static,
{
    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler<E>>) -> Subscription {
        let id = {
            let mut registry = self.registry();
            let id = registry.next_id();
            registry
                .topics
                .entry(topic.to_owned())
                .or_default()
                .push((id, handler));
            id
        };
        self.unsubscribe_action(Some(topic.to_owned()), id)
    }

    fn subscribe_all(&self, handler: Arc<dyn EventHandler<E>>) -> Subscription {
        let id = {
            let mut registry = self.registry();
            let id = registry.next_id();
            registry.wildcard.push((id, handler));
            id
        };
        self.unsubscribe_action(None, id)
    }

    async fn publish(&self, envelope: &EventEnvelope) {
        let (handlers, publishers, on_error) = {
            let registry = self.registry();
            let handlers: Vec<Arc<dyn EventHandler<E>>> = registry
                .topics
                .get(envelope.event_name())
                .into_iter()
                .flatten()
                .chain(registry.wildcard.iter())
                .map(|(_, handler)| handler.clone())
                .collect();
            (
                handlers,
                registry.publishers.clone(),
                registry.on_error.clone(),
            )
        };

        if handlers.is_empty() {
            log::trace!(
                "No handler subscribed to {} (version {} of {})",
                envelope.event_name(),
                envelope.version(),
                envelope.stream(),
            );
        }

        let on_error = on_error.as_ref();
        let deliveries = handlers.iter().map(|handler| async move {
            match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => match on_error {
                    Some(on_error) => on_error(&error, envelope),
                    None => log::debug!(
                        "An event handler failed to handle {}: {error:?}",
                        envelope.event_name(),
                    ),
                },
                Err(_) => log::error!(
                    "An event handler panicked while handling {}",
                    envelope.event_name(),
                ),
            }
        });
        let publications = publishers.iter().map(|publisher| async move {
            if AssertUnwindSafe(publisher(envelope.clone()))
                .catch_unwind()
                .await
                .is_err()
            {
                log::error!(
                    "A publisher panicked while publishing {}",
                    envelope.event_name(),
                );
            }
        });

        join(join_all(deliveries), join_all(publications)).await;
    }

    fn add_publisher(&self, publisher: Publisher) {
        self.registry().publishers.push(publisher);
    }

    fn set_error_handler(&self, handler: ErrorHandler<E>) {
        self.registry().on_error = Some(handler);
    }

    fn subscriber_count(&self, topic: Option<&str>) -> usize {
        let registry = self.registry();
        match topic {
            Some(topic) => registry.topics.get(topic).map_or(0, Vec::len),
            None => registry.topics.values().map(Vec::len).sum::<usize>() + registry.wildcard.len(),
        }
    }

    fn registered_events(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn clear(&self) {
        let mut registry = self.registry();
        registry.topics.clear();
        registry.wildcard.clear();
    }
}
