/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thin facade through which a consensus driver hands units to a chain and reports decisions.
//!
//! An [`Engine`] serializes every operation on its chain behind one lock, and adapts the generic
//! [manager](crate::manager::Manager) to one consensus [`Flavor`]: a linear chain of blocks, or a
//! DAG of vertices.

use std::sync::{Mutex, MutexGuard};

use crate::{
    diff::proposal::ProposalOption,
    manager::{errors::ManagerError, handle::UnitStatus, Manager},
    storage::pluggables::KVStore,
    types::{
        data_types::{ChainID, UnitID},
        transaction::{ProposalTransaction, Transaction},
        unit::{Unit, UnitKind, UnitVisitor},
    },
};

/// The shape of consensus a chain runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Linear chain of `Standard`, `Proposal`, `Commit`, and `Abort` units.
    Linear,

    /// DAG of `Vertex` units.
    Dag,
}

impl Flavor {
    /// Whether units of this flavor are called blocks (as opposed to vertices) when indexed.
    pub fn container_name(&self) -> &'static str {
        match self {
            Flavor::Linear => "block",
            Flavor::Dag => "vertex",
        }
    }
}

// Decides whether a unit belongs to a flavor.
struct FlavorCheck(Flavor);

impl UnitVisitor for FlavorCheck {
    type Output = bool;

    fn visit_standard(&mut self, _: &Unit, _: &[Transaction]) -> bool {
        self.0 == Flavor::Linear
    }

    fn visit_proposal(&mut self, _: &Unit, _: &ProposalTransaction) -> bool {
        self.0 == Flavor::Linear
    }

    fn visit_commit(&mut self, _: &Unit) -> bool {
        self.0 == Flavor::Linear
    }

    fn visit_abort(&mut self, _: &Unit) -> bool {
        self.0 == Flavor::Linear
    }

    fn visit_vertex(&mut self, _: &Unit, _: &[UnitID], _: &[Transaction]) -> bool {
        self.0 == Flavor::Dag
    }
}

pub struct Engine<K: KVStore> {
    chain_id: ChainID,
    flavor: Flavor,
    manager: Mutex<Manager<K>>,
}

impl<K: KVStore> Engine<K> {
    pub fn new(flavor: Flavor, manager: Manager<K>) -> Engine<K> {
        Engine {
            chain_id: manager.chain_id(),
            flavor,
            manager: Mutex::new(manager),
        }
    }

    pub fn chain_id(&self) -> ChainID {
        self.chain_id
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Parse `bytes` into a unit, and verify it.
    ///
    /// Returns the ID of the unit, which is pending once this returns `Ok`.
    pub fn deliver(&self, bytes: &[u8]) -> Result<UnitID, EngineError> {
        let mut manager = self.lock()?;
        let unit = Unit::parse(bytes, manager.config().max_unit_size).map_err(ManagerError::from)?;
        self.verify_locked(&mut manager, unit)
    }

    /// Verify an already-parsed unit.
    pub fn verify(&self, unit: Unit) -> Result<UnitID, EngineError> {
        let mut manager = self.lock()?;
        self.verify_locked(&mut manager, unit)
    }

    pub fn accept(&self, unit: &UnitID) -> Result<(), EngineError> {
        Ok(self.lock()?.accept(unit)?)
    }

    pub fn reject(&self, unit: &UnitID) -> Result<(), EngineError> {
        Ok(self.lock()?.reject(unit)?)
    }

    pub fn last_accepted(&self) -> Result<UnitID, EngineError> {
        Ok(self.lock()?.last_accepted())
    }

    /// Get the option of `proposal` that this node initially prefers.
    pub fn preferred_option(&self, proposal: &UnitID) -> Result<ProposalOption, EngineError> {
        Ok(self.lock()?.preferred_option(proposal)?)
    }

    /// Get a unit the chain knows about.
    pub fn get_unit(&self, unit: &UnitID) -> Result<Unit, EngineError> {
        Ok(self.lock()?.get_unit(unit)?.into_unit())
    }

    /// Get the status of `unit`. Units the chain does not know about are
    /// [`Unverified`](UnitStatus::Unverified).
    pub fn status(&self, unit: &UnitID) -> Result<UnitStatus, EngineError> {
        match self.lock()?.get_unit(unit) {
            Ok(handle) => Ok(handle.status()),
            Err(ManagerError::NotFound { .. }) => Ok(UnitStatus::Unverified),
            Err(err) => Err(err.into()),
        }
    }

    /// Run `f` with shared access to the chain's manager.
    pub fn with_manager<R>(&self, f: impl FnOnce(&Manager<K>) -> R) -> Result<R, EngineError> {
        let manager = self.lock()?;
        Ok(f(&manager))
    }

    fn verify_locked(
        &self,
        manager: &mut Manager<K>,
        unit: Unit,
    ) -> Result<UnitID, EngineError> {
        if !unit.visit(&mut FlavorCheck(self.flavor)) {
            return Err(EngineError::WrongFlavor {
                flavor: self.flavor,
                kind: unit.kind(),
            });
        }
        let id = unit.id();
        manager.verify(unit)?;
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Manager<K>>, EngineError> {
        self.manager.lock().map_err(|_| EngineError::Poisoned {
            chain: self.chain_id,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The unit's kind does not belong to the chain's consensus flavor.
    #[error("{} unit delivered to a {:?} chain", .kind.name(), .flavor)]
    WrongFlavor { flavor: Flavor, kind: UnitKind },

    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// A thread panicked while holding the chain's lock.
    #[error("lock of chain {chain} is poisoned")]
    Poisoned { chain: ChainID },
}
