use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::{
    downcast_output, BoxedOutput, BoxedQuery, Error, ExecutionCallback, OperationKind, Query,
    QueryHandler, QueryPublisher,
};

/// Dispatches [queries](Query) to their [handler](QueryHandler).
///
/// Before a query is executed, it is handed to every registered [QueryPublisher]. Their errors
/// are logged and otherwise ignored.
pub struct QueryBus<E> {
    handlers: HashMap<&'static str, Arc<dyn QueryHandler<E>>>,
    publishers: Vec<Arc<dyn QueryPublisher<E>>>,
    after_execute: Option<ExecutionCallback>,
}

impl<E> Default for QueryBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> QueryBus<E> {
    /// Creates a new, empty, [QueryBus]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            publishers: Vec::new(),
            after_execute: None,
        }
    }

    /// Registers a handler under the name of the query it handles.
    pub fn register(&mut self, handler: Arc<dyn QueryHandler<E>>) {
        let name = handler.query_name();
        if self.handlers.insert(name, handler).is_some() {
            log::debug!("The handler of query {name} was replaced");
        }
    }

    /// Registers a handler. Takes ownership of `self` and returns it to allow chaining.
    pub fn with_handler(mut self, handler: impl QueryHandler<E> + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    /// Adds a publisher called before every execution.
    pub fn add_publisher(&mut self, publisher: Arc<dyn QueryPublisher<E>>) {
        self.publishers.push(publisher);
    }

    /// Sets the callback invoked after each successful execution.
    pub fn set_after_execute(&mut self, callback: ExecutionCallback) {
        self.after_execute = Some(callback);
    }

    /// Returns `true` if a handler is registered for the query name.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// The names of the registered queries, sorted.
    pub fn registered_queries(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl<E> QueryBus<E>
where
    E: From<Error> + Debug,
{
    /// Executes a boxed query with its handler.
    ///
    /// Fails with [Error::HandlerNotFound] if no handler is registered for the query. The
    /// publishers all complete before the handler is called.
    pub async fn execute(&self, query: BoxedQuery) -> Result<BoxedOutput, E> {
        let name = query.name();
        let handler = self.get_query_handler(name)?;

        let publications = join_all(
            self.publishers
                .iter()
                .map(|publisher| publisher.publish(&query)),
        )
        .await;
        for error in publications.into_iter().filter_map(Result::err) {
            log::warn!("A query publisher failed on query {name}: {error:?}");
        }

        let output = handler.handle(query).await?;
        if let Some(after_execute) = &self.after_execute {
            after_execute(name, output.as_ref());
        }
        Ok(output)
    }

    /// Executes a query and downcasts its result.
    pub async fn dispatch<Q: Query>(&self, query: Q) -> Result<Q::Output, E> {
        let output = self.execute(query.into()).await?;
        Ok(downcast_output(output)?)
    }

    fn get_query_handler(&self, name: &'static str) -> Result<&Arc<dyn QueryHandler<E>>, Error> {
        self.handlers.get(name).ok_or_else(|| Error::HandlerNotFound {
            kind: OperationKind::Query,
            name: name.to_owned(),
            known: self.registered_queries(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{query_handler, query_publisher};
    use std::sync::Mutex;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        Kernel(#[from] Error),
        #[error("metrics are down")]
        MetricsDown,
    }

    struct CountAccounts;

    impl Query for CountAccounts {
        const NAME: &'static str = "CountAccounts";
        type Output = usize;
    }

    fn bus(log: &Arc<Mutex<Vec<String>>>) -> QueryBus<TestError> {
        let handler_log = log.clone();
        QueryBus::new().with_handler(query_handler(move |_: CountAccounts| {
            let log = handler_log.clone();
            async move {
                log.lock().unwrap().push("handler".to_owned());
                Ok::<_, TestError>(7)
            }
        }))
    }

    #[tokio::test]
    async fn publishers_run_before_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = bus(&log);
        let publisher_log = log.clone();
        bus.add_publisher(Arc::new(query_publisher(move |name| {
            let log = publisher_log.clone();
            async move {
                log.lock().unwrap().push(format!("published {name}"));
                Ok::<(), TestError>(())
            }
        })));

        assert_eq!(bus.dispatch(CountAccounts).await.unwrap(), 7);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["published CountAccounts", "handler"],
        );
    }

    #[tokio::test]
    async fn failing_publisher_does_not_block_execution() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = bus(&log);
        bus.add_publisher(Arc::new(query_publisher(|_| async {
            Err::<(), _>(TestError::MetricsDown)
        })));

        assert_eq!(bus.dispatch(CountAccounts).await.unwrap(), 7);
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn unknown_query_is_reported_without_running_publishers() {
        struct FindAccount;

        impl Query for FindAccount {
            const NAME: &'static str = "FindAccount";
            type Output = ();
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = bus(&log);
        let publisher_log = log.clone();
        bus.add_publisher(Arc::new(query_publisher(move |name| {
            let log = publisher_log.clone();
            async move {
                log.lock().unwrap().push(name.to_owned());
                Ok::<(), TestError>(())
            }
        })));

        match bus.dispatch(FindAccount).await {
            Err(TestError::Kernel(Error::HandlerNotFound { kind, known, .. })) => {
                assert_eq!(kind, OperationKind::Query);
                assert_eq!(known, vec!["CountAccounts"]);
            }
            other => panic!("expected a missing handler, got {other:?}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }
}
