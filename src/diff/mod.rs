/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Copy-on-write overlays of durable state, one per pending unit.
//!
//! # Layering
//!
//! Every pending unit owns a [`Diff`] that records the effect of executing it: the state records it
//! inserts and deletes, the inputs it consumes, and the atomic requests it makes on other chains. A
//! diff does not copy the state it sits on. Instead, it remembers the ID of its parent unit and
//! resolves it through a [`Versions`] provider whenever a read misses the diff's own layer:
//!
//! ```text
//!   durable state  <-  diff(A)  <-  diff(B)  <-  diff(C)
//!  (last accepted)     (pending)     (pending)     (being verified)
//! ```
//!
//! A read through `diff(C)` sees the changes of `C`, then `B`, then `A`, and finally the accepted
//! state. It never sees the changes of any unit that is not an ancestor of `C`.
//!
//! # Collapsing
//!
//! When a unit is accepted, its diff is [applied](Diff::apply) into a
//! [`DurableWriteBatch`] that is committed atomically together with the unit record. When a unit is
//! rejected, its diff is simply dropped.

pub mod proposal;

use std::collections::{btree_map, btree_set, BTreeMap, BTreeSet};

use crate::{
    storage::{durable::DurableWriteBatch, pluggables::WriteBatch},
    types::{
        data_types::{ChainID, StateKey, StateValue, Timestamp, UnitID},
        transaction::{AtomicRequests, Transaction},
        update_sets::StateUpdates,
    },
};

/// The version of state that a unit's children are executed on top of.
pub enum VersionedState<'a> {
    /// The unit is pending, and its children read through its diff.
    Pending(&'a Diff),

    /// The unit is the last accepted unit, and its children read durable state directly.
    Accepted,
}

/// Resolves the parent references of diffs.
///
/// Implemented by the [`Manager`](crate::manager::Manager), which knows which units are pending and
/// which unit was accepted last.
pub trait Versions {
    /// Get the state that children of `unit` are executed on top of, or `None` if `unit` is neither
    /// pending nor the last accepted unit.
    fn state(&self, unit: &UnitID) -> Option<VersionedState<'_>>;

    /// Read `key` from the accepted state.
    fn accepted_state(&self, key: &[u8]) -> Option<StateValue>;
}

/// Something a diff can be flattened into.
pub trait ApplyTarget {
    fn set(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    /// Record that `key` was consumed as a transaction input.
    fn consume(&mut self, _key: &[u8]) {}

    fn add_atomic_requests(&mut self, chain: ChainID, requests: &AtomicRequests);
}

/// The effect of one pending unit on the state of its chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff {
    parent: UnitID,
    timestamp: Option<Timestamp>,
    updates: StateUpdates,
    consumed: BTreeSet<StateKey>,
    atomic_requests: BTreeMap<ChainID, AtomicRequests>,
}

impl Diff {
    /// Create an empty diff on top of the state of `parent`.
    pub fn new(parent: UnitID, timestamp: Option<Timestamp>) -> Diff {
        Diff {
            parent,
            timestamp,
            updates: StateUpdates::new(),
            consumed: BTreeSet::new(),
            atomic_requests: BTreeMap::new(),
        }
    }

    pub fn parent(&self) -> UnitID {
        self.parent
    }

    /// Timestamp of the unit that owns this diff, if it is a timestamped unit.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// The inserts and deletes recorded in this diff's own layer.
    pub fn updates(&self) -> &StateUpdates {
        &self.updates
    }

    /// The inputs consumed in this diff's own layer.
    pub fn consumed(&self) -> btree_set::Iter<StateKey> {
        self.consumed.iter()
    }

    pub fn consumes(&self, key: &[u8]) -> bool {
        self.consumed.contains(key)
    }

    pub fn atomic_requests(&self) -> btree_map::Iter<ChainID, AtomicRequests> {
        self.atomic_requests.iter()
    }

    /// Read `key` as it is after this diff's unit is executed.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::MissingBase`] if some ancestor layer can no longer be resolved through
    /// `versions`. This happens when the diff belongs to a unit whose branch is no longer viable.
    pub fn get<V: Versions + ?Sized>(
        &self,
        key: &[u8],
        versions: &V,
    ) -> Result<Option<StateValue>, DiffError> {
        if let Some(local) = self.local(key) {
            return Ok(local);
        }

        let mut cursor = self.parent;
        loop {
            match versions.state(&cursor) {
                Some(VersionedState::Pending(diff)) => {
                    if let Some(local) = diff.local(key) {
                        return Ok(local);
                    }
                    cursor = diff.parent;
                }
                Some(VersionedState::Accepted) => return Ok(versions.accepted_state(key)),
                None => return Err(DiffError::MissingBase { unit: cursor }),
            }
        }
    }

    /// Schedule `key` to be set to `value` when this diff is applied.
    pub fn put(&mut self, key: StateKey, value: StateValue) {
        self.updates.insert(key, value);
    }

    /// Schedule `key` to be deleted when this diff is applied.
    pub fn delete(&mut self, key: StateKey) {
        self.updates.delete(key);
    }

    /// Execute `transaction` on top of this diff.
    ///
    /// Every input must be readable through the diff and must not have been consumed by this diff or
    /// any of its pending ancestors. If any input fails these checks, nothing is recorded.
    pub fn execute<V: Versions + ?Sized>(
        &mut self,
        transaction: &Transaction,
        versions: &V,
    ) -> Result<(), DiffError> {
        for input in &transaction.inputs {
            if self.consumes(input) || self.consumed_by_ancestor(input, versions)? {
                return Err(DiffError::DoubleSpend { key: input.clone() });
            }
            if self.get(input, versions)?.is_none() {
                return Err(DiffError::InputNotFound { key: input.clone() });
            }
        }

        for input in &transaction.inputs {
            self.consumed.insert(input.clone());
            self.updates.delete(input.clone());
        }
        for (key, value) in &transaction.outputs {
            self.updates.insert(key.clone(), value.clone());
        }
        for (chain, requests) in &transaction.atomic_requests {
            self.atomic_requests
                .entry(*chain)
                .or_default()
                .extend(requests);
        }

        Ok(())
    }

    /// Flatten this diff's own layer into `target`.
    pub fn apply<T: ApplyTarget + ?Sized>(&self, target: &mut T) {
        for (key, value) in self.updates.inserts() {
            target.set(key, value);
        }
        for key in self.updates.deletes() {
            target.delete(key);
        }
        for key in &self.consumed {
            target.consume(key);
        }
        for (chain, requests) in &self.atomic_requests {
            target.add_atomic_requests(*chain, requests);
        }
    }

    // `Some(Some(value))` if this layer sets `key`, `Some(None)` if it deletes `key`, and `None` if
    // it does not touch `key`.
    fn local(&self, key: &[u8]) -> Option<Option<StateValue>> {
        let key = key.to_vec();
        if let Some(value) = self.updates.get_insert(&key) {
            Some(Some(value.clone()))
        } else if self.updates.contains_delete(&key) {
            Some(None)
        } else {
            None
        }
    }

    fn consumed_by_ancestor<V: Versions + ?Sized>(
        &self,
        key: &[u8],
        versions: &V,
    ) -> Result<bool, DiffError> {
        let mut cursor = self.parent;
        loop {
            match versions.state(&cursor) {
                Some(VersionedState::Pending(diff)) => {
                    if diff.consumes(key) {
                        return Ok(true);
                    }
                    cursor = diff.parent;
                }
                Some(VersionedState::Accepted) => return Ok(false),
                None => return Err(DiffError::MissingBase { unit: cursor }),
            }
        }
    }
}

impl ApplyTarget for Diff {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.put(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        self.updates.delete(key.to_vec());
    }

    fn consume(&mut self, key: &[u8]) {
        self.consumed.insert(key.to_vec());
    }

    fn add_atomic_requests(&mut self, chain: ChainID, requests: &AtomicRequests) {
        self.atomic_requests
            .entry(chain)
            .or_default()
            .extend(requests);
    }
}

impl<W: WriteBatch> ApplyTarget for DurableWriteBatch<W> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.set_accepted_state(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.delete_accepted_state(key);
    }

    fn add_atomic_requests(&mut self, chain: ChainID, requests: &AtomicRequests) {
        self.apply_atomic_requests(chain, requests);
    }
}

/// Errors that may arise when executing transactions in, or reading through, a [`Diff`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// The input was already consumed by this unit, a pending ancestor, or another pending unit.
    #[error("input {key:?} is consumed more than once")]
    DoubleSpend { key: StateKey },

    /// The input does not exist in the state the unit is executed on.
    #[error("input {key:?} not found")]
    InputNotFound { key: StateKey },

    /// An ancestor layer of the diff is neither pending nor the last accepted unit.
    #[error("state of unit {unit} is no longer available")]
    MissingBase { unit: UnitID },
}
