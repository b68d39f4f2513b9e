/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed read-and-write handle over a chain's durable storage.
//!
//! # Initializing durable storage
//!
//! Before a chain can verify or accept anything, its durable storage must hold a last accepted
//! unit. [`DurableState::initialize`] writes the following, atomically:
//!
//! |Variable|Initial value|
//! |---|---|
//! |Units|The [genesis unit](crate::types::unit::Unit::genesis).|
//! |Unit at Height|0 -> the genesis unit.|
//! |Last Accepted|The genesis unit.|
//! |Accepted State|Provided to `initialize`.|
//!
//! # Mutating durable storage
//!
//! All writes are staged in a [`DurableWriteBatch`], which forms keys according to the layout
//! described in [`variables`](super::variables), and then committed with
//! [`DurableState::write`].

use borsh::BorshSerialize;

use crate::{
    indexer::index::{Container, Contents},
    types::{
        data_types::{AcceptIndex, ChainID, ContainerID, UnitHeight, UnitID},
        transaction::AtomicRequests,
        unit::Unit,
        update_sets::StateUpdates,
    },
};

use super::{
    pluggables::{KVGetError, KVSetError, KVStore, Key, StorageError, WriteBatch},
    variables::{self, concat},
};

/// Read and write handle into the durable storage of one chain.
///
/// The manager of a chain owns its `DurableState` exclusively. Nothing else writes the variables in
/// the "Decided units" and "State" groups.
pub struct DurableState<K: KVStore>(K);

impl<K: KVStore> DurableState<K> {
    pub fn new(kv_store: K) -> Self {
        DurableState(kv_store)
    }

    /// Write the genesis unit and `genesis_state` into an empty store, and return the genesis unit.
    ///
    /// If the store has already been initialized, nothing is written and the current last accepted
    /// unit is returned instead.
    pub fn initialize(&mut self, genesis_state: &StateUpdates) -> Result<Unit, DurableStateError> {
        if self.is_initialized() {
            log::debug!("durable state already initialized, keeping the existing last accepted unit");
            return self.last_accepted_unit();
        }

        let genesis = Unit::genesis();
        let mut wb = DurableWriteBatch::new();
        wb.set_unit(&genesis);
        wb.set_unit_at_height(genesis.height(), &genesis.id())?;
        wb.set_last_accepted(&genesis.id())?;
        wb.apply_state_updates(genesis_state);
        self.write(wb)?;

        Ok(genesis)
    }

    pub fn is_initialized(&self) -> bool {
        self.0.has(&variables::LAST_ACCEPTED)
    }

    /// Atomically write the changes in `write_batch`.
    pub fn write(&mut self, write_batch: DurableWriteBatch<K::WriteBatch>) -> Result<(), StorageError> {
        self.0.write(write_batch.0)
    }

    pub fn unit(&self, unit: &UnitID) -> Result<Option<Unit>, DurableStateError> {
        Ok(self.0.unit(unit)?)
    }

    pub fn contains_unit(&self, unit: &UnitID) -> bool {
        self.0.contains_unit(unit)
    }

    pub fn unit_at_height(&self, height: UnitHeight) -> Result<Option<UnitID>, DurableStateError> {
        Ok(self.0.unit_at_height(height)?)
    }

    pub fn last_accepted(&self) -> Result<UnitID, DurableStateError> {
        Ok(self.0.last_accepted()?)
    }

    /// Get the last accepted unit itself.
    pub fn last_accepted_unit(&self) -> Result<Unit, DurableStateError> {
        let id = self.last_accepted()?;
        self.unit(&id)?
            .ok_or(DurableStateError::UnitExpectedButNotFound { unit: id })
    }

    pub fn accepted_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.accepted_state(key)
    }

    pub fn shared_memory(&self, chain: ChainID, key: &[u8]) -> Option<Vec<u8>> {
        self.0.shared_memory(chain, key)
    }
}

/// Errors that may be encountered when reading or writing [`DurableState`].
#[derive(Debug, thiserror::Error)]
pub enum DurableStateError {
    #[error(transparent)]
    KVGetError(#[from] KVGetError),

    #[error(transparent)]
    KVSetError(#[from] KVSetError),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    /// A unit that an invariant of durable storage says must exist could not be found.
    #[error("unit {unit} expected in durable storage but not found")]
    UnitExpectedButNotFound { unit: UnitID },
}

/// Staged changes to durable storage, committed atomically by [`DurableState::write`] or
/// [`KVStore::write`].
pub struct DurableWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> DurableWriteBatch<W> {
    pub fn new() -> DurableWriteBatch<W> {
        DurableWriteBatch(W::new())
    }

    /// Get the underlying write batch, to be passed to [`KVStore::write`].
    pub fn into_inner(self) -> W {
        self.0
    }

    /* ↓↓↓ Units ↓↓↓ */

    pub fn set_unit(&mut self, unit: &Unit) {
        self.0
            .set(&concat(&variables::UNITS, &unit.id().bytes()), unit.bytes());
    }

    pub fn set_unit_at_height(
        &mut self,
        height: UnitHeight,
        unit: &UnitID,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::UNIT_AT_HEIGHT, &height.to_le_bytes()),
            &unit
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::UnitAtHeight { height },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_last_accepted(&mut self, unit: &UnitID) -> Result<(), KVSetError> {
        self.0.set(
            &variables::LAST_ACCEPTED,
            &unit
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastAccepted,
                    source: err,
                })?,
        );
        Ok(())
    }

    /// Stage everything that accepting `unit` changes besides its state diff: the unit itself, the
    /// height index, and the last accepted unit.
    pub fn set_accepted(&mut self, unit: &Unit) -> Result<(), KVSetError> {
        self.set_unit(unit);
        self.set_unit_at_height(unit.height(), &unit.id())?;
        self.set_last_accepted(&unit.id())
    }

    /* ↓↓↓ Accepted State ↓↓↓ */

    pub fn set_accepted_state(&mut self, key: &[u8], value: &[u8]) {
        self.0.set(&concat(&variables::ACCEPTED_STATE, key), value);
    }

    pub fn delete_accepted_state(&mut self, key: &[u8]) {
        self.0.delete(&concat(&variables::ACCEPTED_STATE, key));
    }

    pub fn apply_state_updates(&mut self, state_updates: &StateUpdates) {
        for (key, value) in state_updates.inserts() {
            self.set_accepted_state(key, value);
        }

        for key in state_updates.deletes() {
            self.delete_accepted_state(key);
        }
    }

    /* ↓↓↓ Shared Memory ↓↓↓ */

    pub fn put_shared_memory(&mut self, chain: ChainID, key: &[u8], value: &[u8]) {
        self.0.set(
            &concat(&variables::SHARED_MEMORY, &concat(&chain.to_le_bytes(), key)),
            value,
        );
    }

    pub fn remove_shared_memory(&mut self, chain: ChainID, key: &[u8]) {
        self.0.delete(&concat(
            &variables::SHARED_MEMORY,
            &concat(&chain.to_le_bytes(), key),
        ));
    }

    pub fn apply_atomic_requests(&mut self, chain: ChainID, requests: &AtomicRequests) {
        for key in &requests.removes {
            self.remove_shared_memory(chain, key);
        }
        for (key, value) in &requests.puts {
            self.put_shared_memory(chain, key, value);
        }
    }

    /* ↓↓↓ Index ↓↓↓ */

    pub fn set_indexed_container(
        &mut self,
        chain: ChainID,
        contents: Contents,
        index: AcceptIndex,
        container: &Container,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(
                &variables::INDEX_CONTAINERS,
                &concat(&contents.key_prefix(chain), &index.to_be_bytes()),
            ),
            &container
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::IndexedContainer {
                        chain,
                        contents,
                        index,
                    },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_container_index(
        &mut self,
        chain: ChainID,
        contents: Contents,
        container: &ContainerID,
        index: AcceptIndex,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(
                &variables::INDEX_POSITIONS,
                &concat(&contents.key_prefix(chain), &container.bytes()),
            ),
            &index
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::ContainerIndex {
                        chain,
                        contents,
                        container: *container,
                    },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_next_accept_index(
        &mut self,
        chain: ChainID,
        contents: Contents,
        index: AcceptIndex,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::INDEX_NEXT, &contents.key_prefix(chain)),
            &index
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::NextAcceptIndex { chain, contents },
                    source: err,
                })?,
        );
        Ok(())
    }

    /* ↓↓↓ Indexer markers ↓↓↓ */

    pub fn set_index_incomplete(&mut self, chain: ChainID) {
        self.0
            .set(&concat(&variables::INDEX_INCOMPLETE, &chain.to_le_bytes()), &[]);
    }

    pub fn set_previously_indexed(&mut self, chain: ChainID) {
        self.0
            .set(&concat(&variables::PREVIOUSLY_INDEXED, &chain.to_le_bytes()), &[]);
    }

    pub fn set_has_run(&mut self) {
        self.0.set(&variables::HAS_RUN, &[]);
    }
}

impl<W: WriteBatch> Default for DurableWriteBatch<W> {
    fn default() -> Self {
        Self::new()
    }
}
