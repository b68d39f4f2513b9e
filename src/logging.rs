/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the chain's
//! [configuration](crate::chain::Configuration).
//!
//! The executor logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [AcceptUnit](crate::events::AcceptUnitEvent) is printed:
//!
//! ```text
//! AcceptUnit, 1701329264, 7, fNGCJyk, 12, Commit
//! ```
//!
//! In the snippet:
//! - The third value is the chain ID.
//! - The fourth value is the first seven characters of the Base64 encoding of the unit's ID.
//! - The fifth value is the height of the unit.
//! - The sixth value is the kind of the unit.
//!
//! Registering and deregistering listeners on an [`AcceptorGroup`](crate::acceptor::AcceptorGroup)
//! is always logged, in the same format, with the chain ID and the listener's name as the third
//! and fourth values.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const VERIFY_UNIT: &str = "VerifyUnit";
pub const ACCEPT_UNIT: &str = "AcceptUnit";
pub const REJECT_UNIT: &str = "RejectUnit";
pub const HALT_CHAIN: &str = "HaltChain";

pub const REGISTER_ACCEPTOR: &str = "RegisterAcceptor";
pub const DEREGISTER_ACCEPTOR: &str = "DeregisterAcceptor";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for VerifyUnitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |verify_unit_event: &VerifyUnitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                VERIFY_UNIT,
                secs_since_unix_epoch(verify_unit_event.timestamp),
                verify_unit_event.chain,
                first_seven_base64_chars(&verify_unit_event.unit.bytes()),
                verify_unit_event.height,
                verify_unit_event.kind.name()
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcceptUnitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_unit_event: &AcceptUnitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ACCEPT_UNIT,
                secs_since_unix_epoch(accept_unit_event.timestamp),
                accept_unit_event.chain,
                first_seven_base64_chars(&accept_unit_event.unit.bytes()),
                accept_unit_event.height,
                accept_unit_event.kind.name()
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectUnitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_unit_event: &RejectUnitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REJECT_UNIT,
                secs_since_unix_epoch(reject_unit_event.timestamp),
                reject_unit_event.chain,
                first_seven_base64_chars(&reject_unit_event.unit.bytes()),
                reject_unit_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for HaltChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |halt_chain_event: &HaltChainEvent| {
            log::error!(
                "{}, {}, {}, {}",
                HALT_CHAIN,
                secs_since_unix_epoch(halt_chain_event.timestamp),
                halt_chain_event.chain,
                halt_chain_event.reason
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
