/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Uniform view of a unit, wherever the manager currently keeps it.

use crate::{
    storage::pluggables::KVStore,
    types::{
        data_types::{Timestamp, UnitHeight, UnitID},
        unit::{Unit, UnitKind},
    },
};

use super::{errors::ManagerError, Manager};

/// Where a unit is in its lifecycle.
///
/// ```text
/// Unverified -> Processing -> Accepted
///                          \-> Rejected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    /// Not known to the manager.
    Unverified,

    /// Verified and pending.
    Processing,

    Accepted,

    Rejected,
}

/// A unit returned by [`Manager::get_unit`].
///
/// The handle borrows the manager, so [`parent`](Self::parent) resolves through the same lookup
/// path as the handle itself: pending units first, then recently decided units, then durable
/// storage.
pub struct UnitHandle<'a, K: KVStore> {
    manager: &'a Manager<K>,
    unit: Unit,
    status: UnitStatus,
}

impl<'a, K: KVStore> UnitHandle<'a, K> {
    pub(crate) fn new(manager: &'a Manager<K>, unit: Unit, status: UnitStatus) -> Self {
        UnitHandle {
            manager,
            unit,
            status,
        }
    }

    pub fn id(&self) -> UnitID {
        self.unit.id()
    }

    pub fn height(&self) -> UnitHeight {
        self.unit.height()
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.unit.timestamp()
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn into_unit(self) -> Unit {
        self.unit
    }

    /// Get the unit's parent.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] for the genesis unit, and for units whose parent has been
    /// evicted from memory without ever being accepted.
    pub fn parent(&self) -> Result<UnitHandle<'a, K>, ManagerError> {
        self.manager.get_unit(&self.unit.parent())
    }
}
