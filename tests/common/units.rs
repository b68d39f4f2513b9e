//! Builders for units, transactions, and initialized stores.

use std::sync::Arc;

use rand::Rng;

use decision_executor::{
    acceptor::AcceptorGroup,
    chain::{Chain, Configuration},
    manager::Manager,
    types::{
        data_types::{ChainID, StateKey, Timestamp, UnitID},
        transaction::{ProposalTransaction, Transaction},
        unit::{Unit, UnitBody, DEFAULT_MAX_UNIT_SIZE},
        update_sets::StateUpdates,
    },
};

use super::mem_db::MemDB;

pub(crate) const CHAIN: ChainID = ChainID::new(1);

/// Value of every record in the genesis state.
pub(crate) const GENESIS_VALUE: &[u8] = b"genesis";

/// Key of the `n`-th record of the genesis state.
pub(crate) fn utxo(n: u8) -> StateKey {
    vec![b'u', n]
}

/// A key that no other test helper produces.
pub(crate) fn random_key() -> StateKey {
    let suffix: [u8; 16] = rand::thread_rng().gen();
    let mut key = vec![b'r'];
    key.extend_from_slice(&suffix);
    key
}

/// A genesis state containing `utxo(0)..utxo(n)`.
pub(crate) fn genesis_state(n: u8) -> StateUpdates {
    let mut state = StateUpdates::new();
    for i in 0..n {
        state.insert(utxo(i), GENESIS_VALUE.to_vec());
    }
    state
}

/// Create a store initialized with `genesis_state(n)`, and return it together with the genesis unit.
pub(crate) fn initialized_store(n: u8) -> (MemDB, UnitID) {
    let kv_store = MemDB::new();
    let genesis = Chain::initialize(kv_store.clone(), &genesis_state(n)).unwrap();
    (kv_store, genesis)
}

pub(crate) fn config() -> Configuration {
    Configuration::builder().chain_id(CHAIN).build()
}

/// Create a manager for `CHAIN` on top of a store initialized with `genesis_state(n)`.
pub(crate) fn new_manager(n: u8, acceptors: Arc<AcceptorGroup>) -> (Manager<MemDB>, MemDB) {
    let (kv_store, _) = initialized_store(n);
    let manager = Manager::new(config(), kv_store.clone(), acceptors, None, None).unwrap();
    (manager, kv_store)
}

/// A transaction consuming `inputs` and creating one new record with a random key.
pub(crate) fn spend(inputs: Vec<StateKey>) -> Transaction {
    Transaction::new(inputs, vec![(random_key(), b"output".to_vec())])
}

/// A transaction that consumes nothing and creates `key`.
pub(crate) fn create(key: StateKey, value: &[u8]) -> Transaction {
    Transaction::new(Vec::new(), vec![(key, value.to_vec())])
}

fn build(parent: &Unit, timestamp: Option<Timestamp>, body: UnitBody) -> Unit {
    Unit::build(
        parent.id(),
        parent.height() + 1,
        timestamp,
        body,
        DEFAULT_MAX_UNIT_SIZE,
    )
    .unwrap()
}

pub(crate) fn standard(parent: &Unit, transactions: Vec<Transaction>) -> Unit {
    build(parent, None, UnitBody::Standard { transactions })
}

pub(crate) fn timestamped_standard(
    parent: &Unit,
    secs: u64,
    transactions: Vec<Transaction>,
) -> Unit {
    build(
        parent,
        Some(Timestamp::new(secs)),
        UnitBody::Standard { transactions },
    )
}

pub(crate) fn proposal(parent: &Unit, effect: Transaction, prefer_commit: bool) -> Unit {
    build(
        parent,
        None,
        UnitBody::Proposal {
            transaction: ProposalTransaction {
                effect,
                prefer_commit,
            },
        },
    )
}

pub(crate) fn commit(proposal: &Unit) -> Unit {
    build(proposal, None, UnitBody::Commit)
}

pub(crate) fn abort(proposal: &Unit) -> Unit {
    build(proposal, None, UnitBody::Abort)
}

pub(crate) fn vertex(parent: &Unit, edges: Vec<UnitID>, transactions: Vec<Transaction>) -> Unit {
    build(
        parent,
        None,
        UnitBody::Vertex {
            edges,
            transactions,
        },
    )
}
