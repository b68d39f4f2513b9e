/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors returned by the [`Manager`](super::Manager).

use crate::{
    acceptor::NotifyError,
    diff::DiffError,
    storage::{
        durable::DurableStateError,
        pluggables::{KVSetError, StorageError},
    },
    types::{
        data_types::{StateKey, Timestamp, UnitHeight, UnitID},
        unit::UnitError,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The unit failed its syntactic checks.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unit has height {actual}, but its parent's height plus one is {expected}")]
    InvalidHeight {
        expected: UnitHeight,
        actual: UnitHeight,
    },

    #[error("unit has timestamp {child}, which is earlier than its parent's timestamp {parent}")]
    InvalidTimestamp { parent: Timestamp, child: Timestamp },

    /// The unit's parent is neither pending nor accepted.
    #[error("parent {parent} is unknown")]
    UnknownParent { parent: UnitID },

    /// The unit's parent is known, but the unit may not extend it.
    #[error("unit may not extend {parent}: {reason}")]
    InvalidParent {
        parent: UnitID,
        reason: &'static str,
    },

    #[error("unit {unit} not found")]
    NotFound { unit: UnitID },

    /// The unit was rejected, and a rejected unit is never verified again.
    #[error("unit {unit} was rejected")]
    AlreadyRejected { unit: UnitID },

    #[error("input {key:?} is consumed more than once")]
    DoubleSpend { key: StateKey },

    #[error("input {key:?} not found")]
    InputNotFound { key: StateKey },

    /// The requested decision may never be made on this unit directly.
    #[error("unit {unit} cannot be decided directly: {reason}")]
    IllegalDecision {
        unit: UnitID,
        reason: &'static str,
    },

    #[error("unit {unit} is not a proposal")]
    NotAProposal { unit: UnitID },

    /// The unit does not extend the last accepted unit, so accepting it would fork durable state.
    #[error("unit {unit} does not extend the last accepted unit {last_accepted}")]
    OutOfOrderAccept {
        unit: UnitID,
        last_accepted: UnitID,
    },

    /// Durable storage could not be read or written. A failed write halts the chain.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// The accept was committed, but some listeners failed to process it.
    #[error(transparent)]
    ListenerFailures(#[from] NotifyError),

    /// The chain stopped after a fatal error and refuses every operation.
    #[error("chain halted: {reason}")]
    Halted { reason: String },

    /// Durable storage does not contain a last accepted unit.
    #[error("durable state has not been initialized")]
    Uninitialized,
}

impl From<UnitError> for ManagerError {
    fn from(value: UnitError) -> Self {
        match value {
            UnitError::MalformedPayload(reason) => ManagerError::MalformedPayload(reason),
        }
    }
}

impl From<DiffError> for ManagerError {
    fn from(value: DiffError) -> Self {
        match value {
            DiffError::DoubleSpend { key } => ManagerError::DoubleSpend { key },
            DiffError::InputNotFound { key } => ManagerError::InputNotFound { key },
            DiffError::MissingBase { unit } => ManagerError::InvalidParent {
                parent: unit,
                reason: "the branch it belongs to can no longer be accepted",
            },
        }
    }
}

impl From<DurableStateError> for ManagerError {
    fn from(value: DurableStateError) -> Self {
        ManagerError::StorageFailure(value.to_string())
    }
}

impl From<KVSetError> for ManagerError {
    fn from(value: KVSetError) -> Self {
        ManagerError::StorageFailure(value.to_string())
    }
}

impl From<StorageError> for ManagerError {
    fn from(value: StorageError) -> Self {
        ManagerError::StorageFailure(value.to_string())
    }
}
