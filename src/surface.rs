use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{Command, CommandBus, Error, OperationKind, Query, QueryBus};

/// The commands of an [Application](crate::Application).
///
/// Every command is executed through the shared [CommandBus]. The type of a command carries its
/// name and the type of its result, so a call with a typed command is checked at compile time.
pub struct Commands<E> {
    bus: Arc<CommandBus<E>>,
    modules: Arc<BTreeMap<&'static str, String>>,
}

impl<E> Commands<E> {
    pub(crate) fn new(bus: Arc<CommandBus<E>>, modules: BTreeMap<&'static str, String>) -> Self {
        Self {
            bus,
            modules: Arc::new(modules),
        }
    }

    /// The names of the commands, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    /// Returns `true` if the command is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// The name of the module handling the command.
    pub fn module_of(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }
}

impl<E: From<Error>> Commands<E> {
    /// Executes a command.
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Output, E> {
        self.bus.dispatch(command).await
    }

    /// Returns the executor of the command `C`, failing if the command is not registered.
    pub fn executor<C: Command>(&self) -> Result<CommandExecutor<C, E>, Error> {
        if self.bus.has_handler(C::NAME) {
            Ok(CommandExecutor {
                bus: self.bus.clone(),
                command: PhantomData,
            })
        } else {
            Err(Error::HandlerNotFound {
                kind: OperationKind::Command,
                name: C::NAME.to_owned(),
                known: self.names(),
            })
        }
    }
}

impl<E> Clone for Commands<E> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            modules: self.modules.clone(),
        }
    }
}

/// Executes one command. Obtained from [Commands::executor].
pub struct CommandExecutor<C, E> {
    bus: Arc<CommandBus<E>>,
    command: PhantomData<fn(C)>,
}

impl<C: Command, E: From<Error>> CommandExecutor<C, E> {
    /// The name of the command.
    pub fn name(&self) -> &'static str {
        C::NAME
    }

    /// Executes the command.
    pub async fn execute(&self, command: C) -> Result<C::Output, E> {
        self.bus.dispatch(command).await
    }
}

impl<C, E> Clone for CommandExecutor<C, E> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            command: PhantomData,
        }
    }
}

/// The queries of an [Application](crate::Application).
pub struct Queries<E> {
    bus: Arc<QueryBus<E>>,
    modules: Arc<BTreeMap<&'static str, String>>,
}

impl<E> Queries<E> {
    pub(crate) fn new(bus: Arc<QueryBus<E>>, modules: BTreeMap<&'static str, String>) -> Self {
        Self {
            bus,
            modules: Arc::new(modules),
        }
    }

    /// The names of the queries, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    /// Returns `true` if the query is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// The name of the module handling the query.
    pub fn module_of(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }
}

impl<E: From<Error> + Debug> Queries<E> {
    /// Executes a query.
    pub async fn execute<Q: Query>(&self, query: Q) -> Result<Q::Output, E> {
        self.bus.dispatch(query).await
    }

    /// Returns the executor of the query `Q`, failing if the query is not registered.
    pub fn executor<Q: Query>(&self) -> Result<QueryExecutor<Q, E>, Error> {
        if self.bus.has_handler(Q::NAME) {
            Ok(QueryExecutor {
                bus: self.bus.clone(),
                query: PhantomData,
            })
        } else {
            Err(Error::HandlerNotFound {
                kind: OperationKind::Query,
                name: Q::NAME.to_owned(),
                known: self.names(),
            })
        }
    }
}

impl<E> Clone for Queries<E> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            modules: self.modules.clone(),
        }
    }
}

/// Executes one query. Obtained from [Queries::executor].
pub struct QueryExecutor<Q, E> {
    bus: Arc<QueryBus<E>>,
    query: PhantomData<fn(Q)>,
}

impl<Q: Query, E: From<Error> + Debug> QueryExecutor<Q, E> {
    /// The name of the query.
    pub fn name(&self) -> &'static str {
        Q::NAME
    }

    /// Executes the query.
    pub async fn execute(&self, query: Q) -> Result<Q::Output, E> {
        self.bus.dispatch(query).await
    }
}

impl<Q, E> Clone for QueryExecutor<Q, E> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            query: PhantomData,
        }
    }
}
