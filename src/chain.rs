/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuring and starting a chain.
//!
//! A chain is started in three steps:
//! 1. [`Chain::initialize`] writes the genesis unit and the genesis state into a fresh store. This
//!    does nothing on a store that was already initialized.
//! 2. A [`ChainSpec`] is built, wiring the store together with a [`Configuration`], the node's shared
//!    [`AcceptorGroup`], the chain's [`Flavor`], and optional event handlers.
//! 3. [`ChainSpec::start`] returns a [`Chain`], whose [`engine`](Chain::engine) the consensus
//!    driver then calls.
//!
//! Dropping the `Chain` stops its event bus thread after every event published so far has been
//! handled.

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    acceptor::AcceptorGroup,
    engine::{Engine, Flavor},
    event_bus::*,
    events::*,
    manager::{errors::ManagerError, FatalHook, Manager},
    storage::{
        durable::{DurableState, DurableStateError},
        pluggables::KVStore,
    },
    types::{
        data_types::{ChainID, UnitID},
        unit::DEFAULT_MAX_UNIT_SIZE,
        update_sets::StateUpdates,
    },
};

#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.chain_id(...)`

    Optional:
    - `.max_unit_size(...)`
    - `.accepted_cache_window(...)`
    - `.critical_failure_threshold(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the ID of the chain. Required."))]
    pub chain_id: ChainID,
    #[builder(default = DEFAULT_MAX_UNIT_SIZE, setter(doc = "Set the maximum size, in bytes, of a serialized unit. Optional."))]
    pub max_unit_size: usize,
    #[builder(default = 16, setter(doc = "Set how many heights below the last accepted unit recently decided units are kept in memory. Optional."))]
    pub accepted_cache_window: u64,
    #[builder(default = 1, setter(doc = "Set how many times in a row a listener that requires a complete index may fail before the chain halts. Optional."))]
    pub critical_failure_threshold: u32,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional."))]
    pub log_events: bool,
}

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainSpec]. On the builder call the following methods to construct a valid [ChainSpec].

    Required:
    - `.kv_store(...)`
    - `.configuration(...)`
    - `.acceptors(...)`

    Optional:
    - `.flavor(...)`
    - `.on_verify_unit(...)`
    - `.on_accept_unit(...)`
    - `.on_reject_unit(...)`
    - `.on_halt_chain(...)`
    - `.on_fatal(...)`
"))]
pub struct ChainSpec<K: KVStore> {
    #[builder(setter(doc = "Set the implementation of the chain's Key-Value store. The argument must implement the [KVStore](crate::storage::pluggables::KVStore) trait, and must have been [initialized](Chain::initialize). Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the chain. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the listener registry shared by every chain of the node. Required."))]
    acceptors: Arc<AcceptorGroup>,
    #[builder(default = Flavor::Linear, setter(doc = "Set the consensus flavor of the chain. Optional, defaults to [Flavor::Linear]."))]
    flavor: Flavor,
    #[builder(default, setter(transform = |handler: impl Fn(&VerifyUnitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VerifyUnitEvent>),
    doc = "Register a handler closure to be invoked after a unit is verified and becomes pending. Optional."))]
    on_verify_unit: Option<HandlerPtr<VerifyUnitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptUnitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptUnitEvent>),
    doc = "Register a handler closure to be invoked after a unit is accepted and committed to durable storage. Optional."))]
    on_accept_unit: Option<HandlerPtr<AcceptUnitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectUnitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectUnitEvent>),
    doc = "Register a handler closure to be invoked after a pending unit is rejected. Optional."))]
    on_reject_unit: Option<HandlerPtr<RejectUnitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&HaltChainEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<HaltChainEvent>),
    doc = "Register a handler closure to be invoked after the chain halts. Optional."))]
    on_halt_chain: Option<HandlerPtr<HaltChainEvent>>,
    #[builder(default, setter(transform = |hook: impl Fn(ChainID, &str) + Send + 'static| Some(Box::new(hook) as FatalHook),
    doc = "Register a hook to be invoked synchronously, on the thread that hit the error, when the chain halts. Optional."))]
    on_fatal: Option<FatalHook>,
}

impl<K: KVStore> ChainSpec<K> {
    /// Start the chain's event bus, and return the handle through which the chain is driven.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Uninitialized`] if the store was never
    /// [initialized](Chain::initialize).
    pub fn start(self) -> Result<Chain<K>, ManagerError> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_verify_unit,
            self.on_accept_unit,
            self.on_reject_unit,
            self.on_halt_chain,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let manager = Manager::new(
            self.configuration,
            self.kv_store,
            self.acceptors,
            event_publisher,
            self.on_fatal,
        )?;
        let engine = Arc::new(Engine::new(self.flavor, manager));

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(event_bus), Some(shutdown))
            }
            None => (None, None),
        };

        Ok(Chain {
            engine,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to a running chain. When this value is dropped, the chain's event bus thread is
/// gracefully shut down.
pub struct Chain<K: KVStore> {
    engine: Arc<Engine<K>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Chain<K> {
    /// Write the genesis unit and `genesis_state` into `kv_store`, unless it was already initialized.
    ///
    /// Returns the ID of the genesis unit.
    pub fn initialize(
        kv_store: K,
        genesis_state: &StateUpdates,
    ) -> Result<UnitID, DurableStateError> {
        let mut durable = DurableState::new(kv_store);
        Ok(durable.initialize(genesis_state)?.id())
    }

    /// Get the engine that the consensus driver calls. The engine may be shared with other threads.
    pub fn engine(&self) -> &Arc<Engine<K>> {
        &self.engine
    }
}

impl<K: KVStore> Drop for Chain<K> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            // The bus also exits once every publisher is gone, so a closed channel is fine.
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("event bus of chain {} panicked", self.engine.chain_id());
            }
        }
    }
}
