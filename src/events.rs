/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that a chain emits.
//!
//! An event is emitted after the action it describes has completed. Events are published on a
//! channel by the [manager](crate::manager::Manager) and dispatched to user-provided handlers, and to
//! the default [loggers](crate::logging) if `log_events` is set, by the
//! [event bus](crate::event_bus) thread of a [`Chain`](crate::chain::Chain).

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::types::{
    data_types::{ChainID, UnitHeight, UnitID},
    unit::UnitKind,
};

pub enum Event {
    VerifyUnit(VerifyUnitEvent),
    AcceptUnit(AcceptUnitEvent),
    RejectUnit(RejectUnitEvent),
    HaltChain(HaltChainEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            if event_publisher.send(event).is_err() {
                log::warn!("event bus disconnected, dropping event");
            }
        }
    }
}

/// A unit passed verification and became pending.
pub struct VerifyUnitEvent {
    pub timestamp: SystemTime,
    pub chain: ChainID,
    pub unit: UnitID,
    pub height: UnitHeight,
    pub kind: UnitKind,
}

/// A unit was accepted and its diff was committed to durable storage.
pub struct AcceptUnitEvent {
    pub timestamp: SystemTime,
    pub chain: ChainID,
    pub unit: UnitID,
    pub height: UnitHeight,
    pub kind: UnitKind,
}

/// A pending unit was rejected and its diff was discarded.
pub struct RejectUnitEvent {
    pub timestamp: SystemTime,
    pub chain: ChainID,
    pub unit: UnitID,
    pub height: UnitHeight,
}

/// The chain hit a fatal error and stopped processing decisions.
pub struct HaltChainEvent {
    pub timestamp: SystemTime,
    pub chain: ChainID,
    pub reason: String,
}
