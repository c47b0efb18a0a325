use async_trait::async_trait;
use std::any::{type_name, Any};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;

use crate::{BoxedOutput, Error};

/// A request for data. Executing a query never records events.
///
/// Exactly one [query handler](QueryHandler) is registered for each query name. Queries and
/// [commands](crate::Command) have separate namespaces.
///
/// # Example
///
/// ```
/// pub struct GetBalance {
///     pub account_id: String,
/// }
///
/// impl strata::Query for GetBalance {
///     const NAME: &'static str = "GetBalance";
///     type Output = Option<i64>;
/// }
/// ```
pub trait Query: Sized + Send + Sync + 'static {
    /// The name of the query. Must be unique among queries.
    const NAME: &'static str;

    /// The result of the query.
    type Output: Send + 'static;
}

/// A query that has been boxed to be dispatched.
pub struct BoxedQuery {
    name: &'static str,
    query: Box<dyn Any + Send + Sync>,
}

impl BoxedQuery {
    /// Returns the name of the boxed query.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A reference to the query, to inspect it without consuming it.
    pub fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.query.as_ref()
    }

    /// Tries to downcast the boxed query to a concrete [Query] implementation.
    pub fn downcast<Q: Query>(self) -> Result<Q, Error> {
        self.query
            .downcast()
            .map(|query| *query)
            .map_err(|_| Error::Downcast(type_name::<Q>()))
    }
}

impl<Q: Query> From<Q> for BoxedQuery {
    fn from(query: Q) -> Self {
        BoxedQuery {
            name: Q::NAME,
            query: Box::new(query),
        }
    }
}

impl Debug for BoxedQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedQuery")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handles a query.
#[async_trait]
pub trait QueryHandler<E>: Send + Sync {
    /// The name of the handled query.
    fn query_name(&self) -> &'static str;

    /// Executes a query.
    async fn handle(&self, query: BoxedQuery) -> Result<BoxedOutput, E>;
}

/// A [QueryHandler] calling an async closure with the concrete query.
pub struct FnQueryHandler<Q, F> {
    handler: F,
    query: PhantomData<fn(Q)>,
}

/// Creates a [QueryHandler] for `Q` from an async closure.
pub fn query_handler<Q, F, Fut, E>(handler: F) -> FnQueryHandler<Q, F>
where
    Q: Query,
    F: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Q::Output, E>> + Send + 'static,
{
    FnQueryHandler {
        handler,
        query: PhantomData,
    }
}

#[async_trait]
impl<Q, F, Fut, E> QueryHandler<E> for FnQueryHandler<Q, F>
where
    Q: Query,
    F: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Q::Output, E>> + Send + 'static,
    E: From<Error> + 'static,
{
    fn query_name(&self) -> &'static str {
        Q::NAME
    }

    async fn handle(&self, query: BoxedQuery) -> Result<BoxedOutput, E> {
        let query = query.downcast::<Q>()?;
        let output = (self.handler)(query).await?;
        Ok(Box::new(output))
    }
}

/// Observes queries before they are executed, for instance to collect metrics.
///
/// A failing publisher never prevents the query from being executed.
#[async_trait]
pub trait QueryPublisher<E>: Send + Sync {
    /// Called before the query is handed to its handler.
    async fn publish(&self, query: &BoxedQuery) -> Result<(), E>;
}

/// A [QueryPublisher] calling an async closure with the name of the query.
pub struct FnQueryPublisher<F> {
    publisher: F,
}

/// Creates a [QueryPublisher] from an async closure receiving the name of the query.
pub fn query_publisher<F, Fut, E>(publisher: F) -> FnQueryPublisher<F>
where
    F: Fn(&'static str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    FnQueryPublisher { publisher }
}

#[async_trait]
impl<F, Fut, E> QueryPublisher<E> for FnQueryPublisher<F>
where
    F: Fn(&'static str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: 'static,
{
    async fn publish(&self, query: &BoxedQuery) -> Result<(), E> {
        (self.publisher)(query.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downcast_output;

    #[derive(Debug, PartialEq)]
    struct FindOwner(String);

    impl Query for FindOwner {
        const NAME: &'static str = "FindOwner";
        type Output = Option<String>;
    }

    #[test]
    fn payload_can_be_inspected_before_downcast() {
        let boxed = BoxedQuery::from(FindOwner("a1".into()));

        assert_eq!(boxed.name(), "FindOwner");
        assert_eq!(
            boxed.payload().downcast_ref::<FindOwner>(),
            Some(&FindOwner("a1".into())),
        );
        assert_eq!(boxed.downcast::<FindOwner>().unwrap(), FindOwner("a1".into()));
    }

    #[tokio::test]
    async fn closure_handler_returns_boxed_output() {
        let handler = query_handler(|query: FindOwner| async move {
            Ok::<_, Error>((query.0 == "a1").then(|| "ada".to_owned()))
        });

        let output = handler.handle(FindOwner("a1".into()).into()).await.unwrap();

        assert_eq!(handler.query_name(), "FindOwner");
        assert_eq!(
            downcast_output::<Option<String>>(output).unwrap(),
            Some("ada".to_owned()),
        );
    }
}
