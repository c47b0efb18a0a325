use async_trait::async_trait;
use std::any::{type_name, Any};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;

use crate::Error;

/// The type-erased result of a command or query handler.
pub type BoxedOutput = Box<dyn Any + Send>;

/// Downcasts the result of a handler to its concrete type.
pub fn downcast_output<T: 'static>(output: BoxedOutput) -> Result<T, Error> {
    output
        .downcast()
        .map(|output| *output)
        .map_err(|_| Error::OutputDowncast(type_name::<T>()))
}

/// A request to modify the system.
///
/// Exactly one [command handler](CommandHandler) is registered for each command name.
///
/// # Associated constant and type
///
/// * [NAME](Self::NAME) - the unique name of the command
/// * [Output](Self::Output) - what the handler returns on success
///
/// # Example
///
/// ```
/// #[derive(Debug)]
/// pub struct CreateAccount {
///     pub id: String,
/// }
///
/// impl strata::Command for CreateAccount {
///     const NAME: &'static str = "CreateAccount";
///     type Output = ();
/// }
/// ```
pub trait Command: Sized + Send + Sync + 'static {
    /// The name of the command. Must be unique among commands.
    const NAME: &'static str;

    /// The result of the command.
    type Output: Send + 'static;
}

/// A command that has been boxed to be dispatched.
///
/// Can be created from a [Command].
pub struct BoxedCommand {
    name: &'static str,
    command: Box<dyn Any + Send + Sync>,
}

impl BoxedCommand {
    /// Returns the name of the boxed command.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tries to downcast the boxed command to a concrete [Command] implementation.
    pub fn downcast<C: Command>(self) -> Result<C, Error> {
        self.command
            .downcast()
            .map(|command| *command)
            .map_err(|_| Error::Downcast(type_name::<C>()))
    }
}

impl<C: Command> From<C> for BoxedCommand {
    fn from(command: C) -> Self {
        BoxedCommand {
            name: C::NAME,
            command: Box::new(command),
        }
    }
}

impl Debug for BoxedCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedCommand")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handles a command.
///
/// # Type arguments
///
/// * `E` - the type of errors returned if the handler fails
#[async_trait]
pub trait CommandHandler<E>: Send + Sync {
    /// The name of the handled command.
    fn command_name(&self) -> &'static str;

    /// Executes a command.
    async fn handle(&self, command: BoxedCommand) -> Result<BoxedOutput, E>;
}

/// A [CommandHandler] calling an async closure with the concrete command.
pub struct FnCommandHandler<C, F> {
    handler: F,
    command: PhantomData<fn(C)>,
}

/// Creates a [CommandHandler] for `C` from an async closure.
///
/// # Example
///
/// ```
/// # #[derive(Debug)]
/// # pub struct CreateAccount { pub id: String }
/// # impl strata::Command for CreateAccount {
/// #     const NAME: &'static str = "CreateAccount";
/// #     type Output = String;
/// # }
/// let handler = strata::command_handler(|command: CreateAccount| async move {
///     Ok::<_, strata::Error>(command.id)
/// });
/// ```
pub fn command_handler<C, F, Fut, E>(handler: F) -> FnCommandHandler<C, F>
where
    C: Command,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C::Output, E>> + Send + 'static,
{
    FnCommandHandler {
        handler,
        command: PhantomData,
    }
}

#[async_trait]
impl<C, F, Fut, E> CommandHandler<E> for FnCommandHandler<C, F>
where
    C: Command,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C::Output, E>> + Send + 'static,
    E: From<Error> + 'static,
{
    fn command_name(&self) -> &'static str {
        C::NAME
    }

    async fn handle(&self, command: BoxedCommand) -> Result<BoxedOutput, E> {
        let command = command.downcast::<C>()?;
        let output = (self.handler)(command).await?;
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Rename(String);

    impl Command for Rename {
        const NAME: &'static str = "Rename";
        type Output = usize;
    }

    #[derive(Debug)]
    struct Delete;

    impl Command for Delete {
        const NAME: &'static str = "Delete";
        type Output = ();
    }

    #[test]
    fn boxed_command_keeps_name_and_downcasts() {
        let boxed = BoxedCommand::from(Rename("ada".into()));

        assert_eq!(boxed.name(), "Rename");
        assert_eq!(boxed.downcast::<Rename>().unwrap(), Rename("ada".into()));
    }

    #[test]
    fn downcast_to_wrong_type_fails() {
        let boxed = BoxedCommand::from(Rename("ada".into()));

        assert!(matches!(boxed.downcast::<Delete>(), Err(Error::Downcast(_))));
    }

    #[tokio::test]
    async fn closure_handler_returns_boxed_output() {
        let handler = command_handler(|command: Rename| async move {
            Ok::<_, Error>(command.0.len())
        });

        assert_eq!(handler.command_name(), "Rename");
        let output = handler.handle(Rename("ada".into()).into()).await.unwrap();
        assert_eq!(downcast_output::<usize>(output).unwrap(), 3);
    }

    #[test]
    fn output_downcast_to_wrong_type_fails() {
        let output: BoxedOutput = Box::new(3_usize);

        assert!(matches!(
            downcast_output::<String>(output),
            Err(Error::OutputDowncast(_)),
        ));
    }
}
