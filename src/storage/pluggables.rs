/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable durable storage.
//!
//! The executor never owns a database. Instead, library users provide a type implementing
//! [`KVStore`], and the executor reads and writes its [variables](super::variables) through it.
//! Every write that the executor makes goes through a [`WriteBatch`] so that all of the changes
//! caused by one decision land atomically.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::{
    indexer::index::{Container, Contents},
    types::{
        data_types::{AcceptIndex, ChainID, ContainerID, UnitHeight, UnitID},
        unit::Unit,
    },
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every change in `wb`. Either all of the changes become visible to subsequent
    /// reads, or none of them do and an error is returned.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), StorageError>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /* ↓↓↓ Units ↓↓↓ */

    fn unit(&self, unit: &UnitID) -> Result<Option<Unit>, KVGetError> {
        match self.get(&concat(&variables::UNITS, &unit.bytes())) {
            None => Ok(None),
            // Units are verified before they are written, so the size limit no longer applies.
            Some(bytes) => Ok(Some(Unit::parse(&bytes, usize::MAX).map_err(|err| {
                KVGetError::MalformedUnit {
                    unit: *unit,
                    reason: err.to_string(),
                }
            })?)),
        }
    }

    fn contains_unit(&self, unit: &UnitID) -> bool {
        self.has(&concat(&variables::UNITS, &unit.bytes()))
    }

    /* ↓↓↓ Unit at Height ↓↓↓ */

    fn unit_at_height(&self, height: UnitHeight) -> Result<Option<UnitID>, KVGetError> {
        if let Some(bytes) = self.get(&concat(&variables::UNIT_AT_HEIGHT, &height.to_le_bytes())) {
            Ok(Some(UnitID::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::UnitAtHeight { height },
                    source: err,
                }
            })?))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Last Accepted ↓↓↓ */

    fn last_accepted(&self) -> Result<UnitID, KVGetError> {
        UnitID::deserialize(
            &mut &*self
                .get(&variables::LAST_ACCEPTED)
                .ok_or(KVGetError::ValueExpectedButNotFound {
                    key: Key::LastAccepted,
                })?,
        )
        .map_err(|err| KVGetError::DeserializeValueError {
            key: Key::LastAccepted,
            source: err,
        })
    }

    /* ↓↓↓ Accepted State ↓↓↓ */

    fn accepted_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&concat(&variables::ACCEPTED_STATE, key))
    }

    /* ↓↓↓ Shared Memory ↓↓↓ */

    fn shared_memory(&self, chain: ChainID, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&concat(
            &variables::SHARED_MEMORY,
            &concat(&chain.to_le_bytes(), key),
        ))
    }

    /* ↓↓↓ Index ↓↓↓ */

    fn indexed_container(
        &self,
        chain: ChainID,
        contents: Contents,
        index: AcceptIndex,
    ) -> Result<Option<Container>, KVGetError> {
        if let Some(bytes) = self.get(&concat(
            &variables::INDEX_CONTAINERS,
            &concat(&contents.key_prefix(chain), &index.to_be_bytes()),
        )) {
            Ok(Some(Container::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::IndexedContainer {
                        chain,
                        contents,
                        index,
                    },
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    fn container_index(
        &self,
        chain: ChainID,
        contents: Contents,
        container: &ContainerID,
    ) -> Result<Option<AcceptIndex>, KVGetError> {
        if let Some(bytes) = self.get(&concat(
            &variables::INDEX_POSITIONS,
            &concat(&contents.key_prefix(chain), &container.bytes()),
        )) {
            Ok(Some(AcceptIndex::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::ContainerIndex {
                        chain,
                        contents,
                        container: *container,
                    },
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    /// Get the number of containers in the index of `contents` of `chain`. This is also the index
    /// that the next accepted container will be given.
    fn next_accept_index(
        &self,
        chain: ChainID,
        contents: Contents,
    ) -> Result<AcceptIndex, KVGetError> {
        match self.get(&concat(&variables::INDEX_NEXT, &contents.key_prefix(chain))) {
            None => Ok(AcceptIndex::new(0)),
            Some(bytes) => AcceptIndex::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::NextAcceptIndex { chain, contents },
                    source: err,
                }
            }),
        }
    }

    /* ↓↓↓ Indexer markers ↓↓↓ */

    fn index_incomplete(&self, chain: ChainID) -> bool {
        self.has(&concat(&variables::INDEX_INCOMPLETE, &chain.to_le_bytes()))
    }

    fn previously_indexed(&self, chain: ChainID) -> bool {
        self.has(&concat(&variables::PREVIOUSLY_INDEXED, &chain.to_le_bytes()))
    }

    fn has_run(&self) -> bool {
        self.has(&variables::HAS_RUN)
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found,
/// 3. A stored unit cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum KVGetError {
    #[error("failed to deserialize {key}: {source}")]
    DeserializeValueError { key: Key, source: std::io::Error },

    #[error("expected {key} to be stored, but it was not found")]
    ValueExpectedButNotFound { key: Key },

    #[error("stored unit {unit} is malformed: {reason}")]
    MalformedUnit { unit: UnitID, reason: String },
}

/// Error when trying to serialize a value before setting it into a [`WriteBatch`].
#[derive(Debug, thiserror::Error)]
pub enum KVSetError {
    #[error("failed to serialize {key}: {source}")]
    SerializeValueError { key: Key, source: std::io::Error },
}

/// Error returned by [`KVStore::write`] when a write batch could not be committed.
///
/// A `StorageError` leaves the store unchanged, but the executor treats it as fatal to the chain
/// whose write failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage write failed: {0}")]
pub struct StorageError(pub String);

#[derive(Debug)]
pub enum Key {
    UnitAtHeight { height: UnitHeight },
    LastAccepted,
    IndexedContainer {
        chain: ChainID,
        contents: Contents,
        index: AcceptIndex,
    },
    ContainerIndex {
        chain: ChainID,
        contents: Contents,
        container: ContainerID,
    },
    NextAcceptIndex {
        chain: ChainID,
        contents: Contents,
    },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::UnitAtHeight { height } => write!(f, "Unit at height {}", height),
            Key::LastAccepted => write!(f, "Last Accepted"),
            Key::IndexedContainer {
                chain,
                contents,
                index,
            } => write!(
                f,
                "Container {} in the {} index of chain {}",
                index.int(),
                contents.container_name(),
                chain
            ),
            Key::ContainerIndex {
                chain,
                contents,
                container,
            } => write!(
                f,
                "Index of {} {} of chain {}",
                contents.container_name(),
                container,
                chain
            ),
            Key::NextAcceptIndex { chain, contents } => write!(
                f,
                "Next accept index of the {} index of chain {}",
                contents.container_name(),
                chain
            ),
        }
    }
}
