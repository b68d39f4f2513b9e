/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a chain hosted by this node.
///
/// Units of different chains never share a pending-decision manager, but they do share the
/// [acceptor registry](crate::acceptor::AcceptorGroup), which keys its listeners by `ChainID`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner value, used as a key prefix in durable
    /// storage.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for ChainID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Height of a decision unit.
///
/// The genesis unit has height 0; every other unit has exactly its parent's height plus one.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct UnitHeight(u64);

impl UnitHeight {
    /// Create a new `UnitHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// The height of a genesis unit.
    pub const fn genesis() -> Self {
        Self(0)
    }

    /// Get the inner `u64` value of this `UnitHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `UnitHeight`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for UnitHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for UnitHeight {
    type Output = UnitHeight;
    fn add(self, rhs: u64) -> Self::Output {
        UnitHeight::new(self.0.add(rhs))
    }
}

impl Sub<UnitHeight> for UnitHeight {
    type Output = u64;
    fn sub(self, rhs: UnitHeight) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// 32-byte SHA-256 digest of a unit's serialized bytes. Doubles as the unit's identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct UnitID([u8; 32]);

impl UnitID {
    /// Create a new `UnitID` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes ID, used as the parent of genesis units.
    pub const fn empty() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `UnitID`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for UnitID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for UnitID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "UnitID({})", self)
    }
}

/// 32-byte identity of a container in an [`Index`](crate::indexer::index::Index): the ID of an
/// accepted unit, or the SHA-256 digest of a serialized transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct ContainerID([u8; 32]);

impl ContainerID {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<UnitID> for ContainerID {
    fn from(unit: UnitID) -> Self {
        Self(unit.bytes())
    }
}

impl Display for ContainerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for ContainerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerID({})", self)
    }
}

/// Wall-clock time carried by timestamped units, in seconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` from seconds since the Unix epoch.
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the number of seconds since the Unix epoch.
    pub const fn secs(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Position of an accepted container in a chain's [`Index`](crate::indexer::index::Index).
///
/// The first container accepted after an index is created has index 0.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct AcceptIndex(u64);

impl AcceptIndex {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the big-endian representation of the inner value. Big-endian keeps the durable keys of
    /// an index sorted in accept order.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

/// List of pending children of a particular unit.
///
/// The "children" of a `unit` is the set of pending units whose `parent` is `unit`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ChildrenList(Vec<UnitID>);

impl ChildrenList {
    /// Get a reference to the inner `Vec<UnitID>` value of this `ChildrenList`.
    pub const fn vec(&self) -> &Vec<UnitID> {
        &self.0
    }

    /// Iterate through the IDs of the units in this `ChildrenList`.
    pub fn iter(&self) -> std::slice::Iter<'_, UnitID> {
        self.0.iter()
    }

    /// Add `id` to this `ChildrenList` if it is not already present.
    pub(crate) fn push(&mut self, id: UnitID) {
        if !self.0.contains(&id) {
            self.0.push(id)
        }
    }

    /// Remove `id` from this `ChildrenList`.
    pub(crate) fn remove(&mut self, id: &UnitID) {
        self.0.retain(|child| child != id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Key of a record in the chain's state (for example, an unspent output).
pub type StateKey = Vec<u8>;

/// Value of a record in the chain's state.
pub type StateValue = Vec<u8>;
