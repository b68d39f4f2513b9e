/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The minimal transaction model that unit payloads carry.
//!
//! A [`Transaction`] consumes a set of existing state records (its `inputs`), creates a set of new
//! records (its `outputs`), and may ask for records to be put into or removed from the shared memory
//! of other chains (its `atomic_requests`). This is all the state-diff machinery needs to know about
//! transactions: spend rules and fees are the business of the hosting virtual machine.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{ChainID, StateKey, StateValue};

#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    /// Keys of the state records this transaction consumes. Each may be consumed at most once across
    /// a chain of pending units.
    pub inputs: Vec<StateKey>,

    /// State records this transaction creates.
    pub outputs: Vec<(StateKey, StateValue)>,

    /// Requests on the shared memory of other chains, grouped by destination chain.
    pub atomic_requests: Vec<(ChainID, AtomicRequests)>,
}

impl Transaction {
    pub fn new(inputs: Vec<StateKey>, outputs: Vec<(StateKey, StateValue)>) -> Self {
        Self {
            inputs,
            outputs,
            atomic_requests: Vec::new(),
        }
    }

    /// Attach a request on the shared memory of `chain` to this transaction.
    pub fn with_atomic_requests(mut self, chain: ChainID, requests: AtomicRequests) -> Self {
        self.atomic_requests.push((chain, requests));
        self
    }

    /// Check the shape of this transaction without consulting any state.
    ///
    /// Returns the reason the transaction is malformed, if it is.
    pub fn verify_syntax(&self) -> Result<(), String> {
        if self.inputs.is_empty() && self.outputs.is_empty() && self.atomic_requests.is_empty() {
            return Err(String::from("transaction has no effect"));
        }

        let mut inputs = BTreeSet::new();
        for input in &self.inputs {
            if !inputs.insert(input) {
                return Err(String::from("transaction consumes the same input twice"));
            }
        }

        let mut outputs = BTreeSet::new();
        for (key, _) in &self.outputs {
            if inputs.contains(key) {
                return Err(String::from("transaction re-creates one of its own inputs"));
            }
            if !outputs.insert(key) {
                return Err(String::from("transaction creates the same output twice"));
            }
        }

        let mut chains = BTreeSet::new();
        for (chain, _) in &self.atomic_requests {
            if !chains.insert(chain) {
                return Err(format!("transaction has two request sets for chain {}", chain));
            }
        }

        Ok(())
    }
}

/// Records to put into and remove from one destination chain's shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct AtomicRequests {
    pub puts: Vec<(StateKey, StateValue)>,
    pub removes: Vec<StateKey>,
}

impl AtomicRequests {
    /// Append the requests in `other` to `self`.
    pub fn extend(&mut self, other: &AtomicRequests) {
        self.puts.extend(other.puts.iter().cloned());
        self.removes.extend(other.removes.iter().cloned());
    }
}

/// Transaction carried by a [`Proposal`](super::unit::UnitBody::Proposal) unit.
///
/// Its `effect` is only applied if the proposal's `Commit` option is accepted. Which option this
/// node initially prefers is recorded in `prefer_commit`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalTransaction {
    pub effect: Transaction,
    pub prefer_commit: bool,
}
