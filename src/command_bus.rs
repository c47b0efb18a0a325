use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::downcast_output;
use crate::{BoxedCommand, BoxedOutput, Command, CommandHandler, Error, OperationKind};

/// The callback invoked after a successful execution, with the name of the operation and its
/// result.
pub type ExecutionCallback = Arc<dyn Fn(&str, &(dyn Any + Send)) + Send + Sync>;

/// Dispatches [commands](Command) to their [handler](CommandHandler).
///
/// Exactly one handler is registered per command name. Registering a second handler for the
/// same name replaces the first one: rejecting duplicates is the job of the
/// [Application](crate::Application).
///
/// Can be created using [new()](CommandBus::new) or the [Default] implementation.
pub struct CommandBus<E> {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler<E>>>,
    after_execute: Option<ExecutionCallback>,
}

impl<E> Default for CommandBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> CommandBus<E> {
    /// Creates a new, empty, [CommandBus]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            after_execute: None,
        }
    }

    /// Registers a handler under the name of the command it handles.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler<E>>) {
        let name = handler.command_name();
        if self.handlers.insert(name, handler).is_some() {
            log::debug!("The handler of command {name} was replaced");
        }
    }

    /// Registers a handler. Takes ownership of `self` and returns it to allow chaining.
    pub fn with_handler(mut self, handler: impl CommandHandler<E> + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    /// Sets the callback invoked after each successful execution.
    pub fn set_after_execute(&mut self, callback: ExecutionCallback) {
        self.after_execute = Some(callback);
    }

    /// Returns `true` if a handler is registered for the command name.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// The names of the registered commands, sorted.
    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<E> CommandBus<E>
where
    E: From<Error>,
{
    /// Executes a boxed command with its handler.
    ///
    /// Fails with [Error::HandlerNotFound] if no handler is registered for the command. Errors
    /// returned by the handler are returned unchanged.
    pub async fn execute(&self, command: BoxedCommand) -> Result<BoxedOutput, E> {
        let name = command.name();
        let output = self.get_command_handler(name)?.handle(command).await?;
        if let Some(after_execute) = &self.after_execute {
            after_execute(name, output.as_ref());
        }
        Ok(output)
    }

    /// Executes a command and downcasts its result.
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<C::Output, E> {
        let output = self.execute(command.into()).await?;
        Ok(downcast_output(output)?)
    }

    fn get_command_handler(
        &self,
        name: &'static str,
    ) -> Result<&Arc<dyn CommandHandler<E>>, Error> {
        self.handlers.get(name).ok_or_else(|| Error::HandlerNotFound {
            kind: OperationKind::Command,
            name: name.to_owned(),
            known: self.registered_commands(),
        })
    }
}
