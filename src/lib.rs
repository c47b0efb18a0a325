//! # Strata
//!
//! Strata provides composable primitives for building event-sourced, CQRS-style applications.
//!
//! ## Concepts
//!
//! Anything that can happen is modeled with an [Event]. Business entities are designed with
//! [aggregates](Aggregate), whose state is derived solely by replaying their own ordered events
//! into an [AggregateRoot].
//!
//! Events are appended to streams of an [EventStore], which checks the expected version of the
//! stream (optimistic concurrency), wraps every event into an [EventEnvelope] and publishes the
//! envelopes once they are persisted. The store delegates storage to an [EventStoreBackend].
//!
//! ## Buses
//!
//! [Commands](Command) and [queries](Query) are dispatched by name to exactly one handler, through
//! a [CommandBus] and a [QueryBus]. Envelopes are delivered to any number of
//! [event handlers](EventHandler) through an [EventBus]. A failing event handler never affects
//! the other handlers, nor the command that produced the event.
//!
//! ## Modules
//!
//! An [Application] is composed from independent [modules](Module). Each module provides its
//! handlers in a [Configuration]. Composition fails if two modules handle the same command or the
//! same query, and connects the store to the bus so that every appended event reaches the
//! handlers of every module. Modules only communicate through events.
//!
//! ## Features
//!
//! The `derive` feature, which is enabled by default, provides derive macros for [Event],
//! [Command] and [Query].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(__docs, feature(doc_auto_cfg))]

#[cfg(feature = "derive")]
extern crate self as strata;

mod aggregate;
mod application;
mod command;
mod command_bus;
mod configuration;
mod error;
mod event;
mod event_bus;
mod event_store;
mod memory_bus;
mod memory_store;
mod query;
mod query_bus;
mod stream;
mod surface;

pub use aggregate::{Aggregate, AggregateRoot, Appliers};
pub use application::{module, Application, ApplicationBuilder, Dependencies, FnModule, Module};
pub use command::{
    command_handler, downcast_output, BoxedCommand, BoxedOutput, Command, CommandHandler,
    FnCommandHandler,
};
pub use command_bus::{CommandBus, ExecutionCallback};
pub use configuration::{Configuration, Topic};
pub use error::{BoxError, Error, OperationKind};
pub use event::{Event, SerializedEvent};
pub use event_bus::{
    event_handler, typed_event_handler, ErrorHandler, EventBus, EventHandler, FnEventHandler,
    Subscription, TypedEventHandler,
};
pub use event_store::{
    publisher, AppendOptions, EnvelopeBatches, EventStore, EventStoreBackend, PeriodFilter,
    Publisher, ReadFilter,
};
pub use memory_bus::InMemoryEventBus;
pub use memory_store::InMemoryEventStore;
pub use query::{
    query_handler, query_publisher, BoxedQuery, FnQueryHandler, FnQueryPublisher, Query,
    QueryHandler, QueryPublisher,
};
pub use query_bus::QueryBus;
pub use stream::{EventEnvelope, EventStream};
pub use surface::{CommandExecutor, Commands, Queries, QueryExecutor};

#[cfg(feature = "derive")]
pub use strata_macros::{Command, Event, Query};

pub use async_trait::async_trait;
