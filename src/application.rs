use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::{
    CommandBus, Commands, Configuration, Error, ErrorHandler, EventBus, EventEnvelope,
    EventStore, ExecutionCallback, InMemoryEventBus, OperationKind, Queries, QueryBus,
    QueryPublisher, Subscription, Topic,
};

/// The shared infrastructure handed to every [Module] during its setup.
pub struct Dependencies<E> {
    /// The store shared by all modules.
    pub event_store: Arc<EventStore>,
    /// The bus shared by all modules.
    pub event_bus: Arc<dyn EventBus<E>>,
}

impl<E> Clone for Dependencies<E> {
    fn clone(&self) -> Self {
        Self {
            event_store: self.event_store.clone(),
            event_bus: self.event_bus.clone(),
        }
    }
}

/// A named bundle of handlers, composed with other modules into an [Application].
///
/// Modules never call each other: they only communicate through the events they publish and
/// subscribe to.
pub trait Module<E> {
    /// The name of the module, used in error messages.
    fn name(&self) -> &str;

    /// Creates the handlers of the module. Called exactly once, when the application is built.
    fn setup(&self, dependencies: &Dependencies<E>) -> Configuration<E>;
}

/// A [Module] defined by a name and a setup closure.
pub struct FnModule<F> {
    name: String,
    setup: F,
}

/// Creates a [Module] from a name and a setup closure.
///
/// # Example
///
/// ```
/// use strata::{Configuration, Dependencies};
///
/// let audit = strata::module("audit", |_: &Dependencies<strata::Error>| {
///     Configuration::new()
/// });
/// ```
pub fn module<E, F>(name: impl Into<String>, setup: F) -> FnModule<F>
where
    F: Fn(&Dependencies<E>) -> Configuration<E>,
{
    FnModule {
        name: name.into(),
        setup,
    }
}

impl<E, F> Module<E> for FnModule<F>
where
    F: Fn(&Dependencies<E>) -> Configuration<E>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&self, dependencies: &Dependencies<E>) -> Configuration<E> {
        (self.setup)(dependencies)
    }
}

/// Builds an [Application] from modules.
///
/// Created with [Application::builder].
pub struct ApplicationBuilder<E> {
    event_store: Arc<EventStore>,
    event_bus: Arc<dyn EventBus<E>>,
    modules: Vec<Box<dyn Module<E>>>,
    after_command: Option<ExecutionCallback>,
    after_query: Option<ExecutionCallback>,
    query_publishers: Vec<Arc<dyn QueryPublisher<E>>>,
    on_event_error: Option<ErrorHandler<E>>,
}

impl<E: 'static> ApplicationBuilder<E> {
    /// Adds a module. Modules are set up in the order they are added.
    pub fn module(mut self, module: impl Module<E> + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Sets the callback invoked after each successful command.
    pub fn after_command(mut self, callback: ExecutionCallback) -> Self {
        self.after_command = Some(callback);
        self
    }

    /// Sets the callback invoked after each successful query.
    pub fn after_query(mut self, callback: ExecutionCallback) -> Self {
        self.after_query = Some(callback);
        self
    }

    /// Adds a publisher called before each query.
    pub fn query_publisher(mut self, publisher: impl QueryPublisher<E> + 'static) -> Self {
        self.query_publishers.push(Arc::new(publisher));
        self
    }

    /// Sets the callback receiving the errors of event handlers.
    pub fn on_event_error(
        mut self,
        handler: impl Fn(&E, &EventEnvelope) + Send + Sync + 'static,
    ) -> Self {
        self.on_event_error = Some(Arc::new(handler));
        self
    }

    /// Sets up the modules and wires their handlers.
    ///
    /// Fails with [Error::ModuleRegistrationConflict] if two modules, or one module twice,
    /// register a handler for the same command or for the same query. In that case nothing is
    /// registered on the event bus nor on the event store.
    pub fn build(self) -> Result<Application<E>, Error> {
        let dependencies = Dependencies {
            event_store: self.event_store.clone(),
            event_bus: self.event_bus.clone(),
        };

        let mut command_modules = BTreeMap::new();
        let mut query_modules = BTreeMap::new();
        let mut configurations = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let name = module.name().to_owned();
            log::debug!("Setting up module {name}");
            let configuration = module.setup(&dependencies);
            claim(
                &mut command_modules,
                OperationKind::Command,
                configuration.command_names(),
                &name,
            )?;
            claim(
                &mut query_modules,
                OperationKind::Query,
                configuration.query_names(),
                &name,
            )?;
            configurations.push(configuration);
        }

        let mut command_bus = CommandBus::new();
        let mut query_bus = QueryBus::new();
        let mut subscriptions = Vec::new();
        for configuration in configurations {
            for handler in configuration.command_handlers {
                command_bus.register(handler);
            }
            for handler in configuration.query_handlers {
                query_bus.register(handler);
            }
            for (topic, handler) in configuration.event_handlers {
                subscriptions.push(match topic {
                    Topic::Named(topic) => self.event_bus.subscribe(&topic, handler),
                    Topic::All => self.event_bus.subscribe_all(handler),
                });
            }
        }
        if let Some(callback) = self.after_command {
            command_bus.set_after_execute(callback);
        }
        if let Some(callback) = self.after_query {
            query_bus.set_after_execute(callback);
        }
        for publisher in self.query_publishers {
            query_bus.add_publisher(publisher);
        }
        if let Some(handler) = self.on_event_error {
            self.event_bus.set_error_handler(handler);
        }

        let event_bus = self.event_bus.clone();
        self.event_store.set_publisher(move |envelope| {
            let event_bus = event_bus.clone();
            async move { event_bus.publish(&envelope).await }
        });

        let modules: Vec<String> = self
            .modules
            .iter()
            .map(|module| module.name().to_owned())
            .collect();
        log::info!(
            "Application composed from {} module(s): {} command(s), {} query(ies), {} subscription(s)",
            modules.len(),
            command_modules.len(),
            query_modules.len(),
            subscriptions.len(),
        );

        let command_bus = Arc::new(command_bus);
        let query_bus = Arc::new(query_bus);
        Ok(Application {
            modules,
            commands: Commands::new(command_bus.clone(), command_modules),
            queries: Queries::new(query_bus.clone(), query_modules),
            command_bus,
            query_bus,
            event_bus: self.event_bus,
            event_store: self.event_store,
            subscriptions,
        })
    }
}

fn claim(
    owners: &mut BTreeMap<&'static str, String>,
    kind: OperationKind,
    names: Vec<&'static str>,
    module: &str,
) -> Result<(), Error> {
    for name in names {
        match owners.entry(name) {
            Entry::Occupied(entry) => {
                return Err(Error::ModuleRegistrationConflict {
                    kind,
                    name,
                    first_module: entry.get().clone(),
                    conflicting_module: module.to_owned(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(module.to_owned());
            }
        }
    }
    Ok(())
}

/// An application composed from [modules](Module).
///
/// Owns the command and query buses holding the handlers of every module, and shares the event
/// store and the event bus with them. Every event appended to the store is published on the bus.
pub struct Application<E> {
    modules: Vec<String>,
    commands: Commands<E>,
    queries: Queries<E>,
    command_bus: Arc<CommandBus<E>>,
    query_bus: Arc<QueryBus<E>>,
    event_bus: Arc<dyn EventBus<E>>,
    event_store: Arc<EventStore>,
    subscriptions: Vec<Subscription>,
}

impl<E: 'static> Application<E> {
    /// Starts building an application over the given store and bus.
    pub fn builder(
        event_store: Arc<EventStore>,
        event_bus: Arc<dyn EventBus<E>>,
    ) -> ApplicationBuilder<E> {
        ApplicationBuilder {
            event_store,
            event_bus,
            modules: Vec::new(),
            after_command: None,
            after_query: None,
            query_publishers: Vec::new(),
            on_event_error: None,
        }
    }
}

impl<E> Application<E>
where
    E: Debug + Send + 'static,
{
    /// Starts building an application over an in-memory store and an in-memory bus.
    pub fn in_memory() -> ApplicationBuilder<E> {
        Self::builder(
            Arc::new(EventStore::in_memory()),
            Arc::new(InMemoryEventBus::new()),
        )
    }
}

impl<E> Application<E> {
    /// The commands of every module.
    pub fn commands(&self) -> &Commands<E> {
        &self.commands
    }

    /// The queries of every module.
    pub fn queries(&self) -> &Queries<E> {
        &self.queries
    }

    /// The shared command bus.
    pub fn command_bus(&self) -> &Arc<CommandBus<E>> {
        &self.command_bus
    }

    /// The shared query bus.
    pub fn query_bus(&self) -> &Arc<QueryBus<E>> {
        &self.query_bus
    }

    /// The shared event bus.
    pub fn event_bus(&self) -> &Arc<dyn EventBus<E>> {
        &self.event_bus
    }

    /// The shared event store.
    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    /// The names of the modules, in the order they were added.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Connects the event store.
    pub async fn start(&self) -> Result<(), Error> {
        self.event_store.connect().await
    }

    /// Cancels the subscriptions of the modules and disconnects the event store.
    pub async fn shutdown(self) -> Result<(), Error> {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        self.event_store.disconnect().await?;
        log::info!("Application shut down");
        Ok(())
    }
}
