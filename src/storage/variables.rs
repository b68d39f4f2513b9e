/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each durable variable is stored in the user-provided key-value
//! store.
//!
//! # List of durable variables
//!
//! ## Decided units
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Units|[`UnitID`](crate::types::data_types::UnitID) -> serialized [`Unit`](crate::types::unit::Unit)|Every accepted unit, including the genesis unit.|
//! |Unit at Height|[`UnitHeight`](crate::types::data_types::UnitHeight) -> [`UnitID`](crate::types::data_types::UnitID)|The accepted unit at each height.|
//! |Last Accepted|[`UnitID`](crate::types::data_types::UnitID)|The most recently accepted unit.|
//!
//! ## State
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Accepted State|[`StateKey`](crate::types::data_types::StateKey) -> [`StateValue`](crate::types::data_types::StateValue)|The chain state produced by applying the diffs of every accepted unit in sequence.|
//! |Shared Memory|([`ChainID`](crate::types::data_types::ChainID), key) -> value|Records put into the shared memory of other chains by accepted atomic requests.|
//!
//! ## Index
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Index Containers|([`ChainID`](crate::types::data_types::ChainID), [`Contents`](crate::indexer::index::Contents), [`AcceptIndex`](crate::types::data_types::AcceptIndex)) -> [`Container`](crate::indexer::index::Container)|Indexed containers in accept order.|
//! |Index Positions|([`ChainID`](crate::types::data_types::ChainID), [`Contents`](crate::indexer::index::Contents), [`ContainerID`](crate::types::data_types::ContainerID)) -> [`AcceptIndex`](crate::types::data_types::AcceptIndex)|Position of each indexed container.|
//! |Index Next|([`ChainID`](crate::types::data_types::ChainID), [`Contents`](crate::indexer::index::Contents)) -> [`AcceptIndex`](crate::types::data_types::AcceptIndex)|Number of containers indexed so far.|
//! |Index Incomplete|[`ChainID`](crate::types::data_types::ChainID) -> ()|Presence means some accepted containers of the chain were never indexed.|
//! |Previously Indexed|[`ChainID`](crate::types::data_types::ChainID) -> ()|Presence means the chain was indexed in some earlier run.|
//! |Has Run|()|Presence means the node has run at least once.|
//!
//! # Persistence
//!
//! Single values are stored at one-byte constant keys. Mappings are stored at the concatenation of a
//! one-byte prefix and the key of the mapping, where integers are little-endian except
//! [`AcceptIndex`](crate::types::data_types::AcceptIndex), which is big-endian so that an index
//! iterates in accept order. [`Contents`](crate::indexer::index::Contents) is stored as one tag byte
//! after the chain. Markers are stored with an empty value: only their presence matters.

// Decided units
pub const UNITS: [u8; 1] = [0];
pub const UNIT_AT_HEIGHT: [u8; 1] = [1];
pub const LAST_ACCEPTED: [u8; 1] = [2];

// State
pub const ACCEPTED_STATE: [u8; 1] = [3];
pub const SHARED_MEMORY: [u8; 1] = [4];

// Index
pub const INDEX_CONTAINERS: [u8; 1] = [5];
pub const INDEX_POSITIONS: [u8; 1] = [6];
pub const INDEX_NEXT: [u8; 1] = [7];
pub const INDEX_INCOMPLETE: [u8; 1] = [8];
pub const PREVIOUSLY_INDEXED: [u8; 1] = [9];
pub const HAS_RUN: [u8; 1] = [10];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
