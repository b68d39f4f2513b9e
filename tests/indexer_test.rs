//! Tests for the node-wide indexer, and for the indices it maintains.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use borsh::BorshSerialize;

use decision_executor::{
    acceptor::{AcceptContext, Acceptor, AcceptorError, AcceptorGroup},
    engine::Flavor,
    indexer::{
        index::{Contents, Index, MAX_FETCHED_BY_RANGE},
        index_name, transaction_index_name, IndexerConfig, Indexer, IndexerError,
    },
    manager::Manager,
    storage::pluggables::KVGet,
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{AcceptIndex, ContainerID},
        transaction::Transaction,
        unit::Unit,
    },
};

mod common;

use common::{
    mem_db::MemDB,
    units::{config, create, initialized_store, spend, standard, utxo, vertex, CHAIN},
};

fn enabled() -> IndexerConfig {
    IndexerConfig::builder().build()
}

fn disabled() -> IndexerConfig {
    IndexerConfig::builder().indexing_enabled(false).build()
}

// Creates an indexer whose shutdown action sets the returned flag.
fn new_indexer(
    config: IndexerConfig,
    kv_store: MemDB,
    acceptors: Arc<AcceptorGroup>,
) -> (Indexer<MemDB>, Arc<AtomicBool>) {
    let shut_down = Arc::new(AtomicBool::new(false));
    let flag = shut_down.clone();
    let indexer = Indexer::new(config, kv_store, acceptors, move || {
        flag.store(true, Ordering::SeqCst)
    })
    .unwrap();
    (indexer, shut_down)
}

// A chain of `n` units on top of genesis.
fn units(n: u8) -> Vec<Unit> {
    let mut parent = Unit::genesis();
    let mut units = Vec::new();
    for i in 0..n {
        let unit = standard(&parent, vec![spend(vec![utxo(i)])]);
        units.push(unit.clone());
        parent = unit;
    }
    units
}

#[test]
fn enabled_indexing_registers_an_index() {
    let kv_store = MemDB::new();
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, shut_down) = new_indexer(enabled(), kv_store.clone(), acceptors.clone());
    assert!(!indexer.has_run_before());

    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();

    assert_eq!(acceptors.listeners(CHAIN), vec![index_name(CHAIN)]);
    assert_eq!(index_name(CHAIN), "index-1");
    assert!(kv_store.previously_indexed(CHAIN));
    assert!(!kv_store.index_incomplete(CHAIN));

    // Registering the same chain again does nothing.
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    assert_eq!(acceptors.listeners(CHAIN).len(), 1);

    assert!(!indexer.is_closed());
    assert!(!shut_down.load(Ordering::SeqCst));
}

#[test]
fn index_stores_containers_in_accept_order() {
    let kv_store = MemDB::new();
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, _) = new_indexer(enabled(), kv_store, acceptors.clone());
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    let index = indexer.get_index(CHAIN).unwrap();

    assert!(matches!(
        index.get_last_accepted(),
        Err(IndexerError::NotFound(_))
    ));

    let units = units(3);
    let ctx = AcceptContext::new(CHAIN);
    for unit in &units {
        acceptors.notify(&ctx, unit).unwrap();
    }

    for (i, unit) in units.iter().enumerate() {
        let at = AcceptIndex::new(i as u64);
        let container = index.get_container_by_index(at).unwrap();
        assert_eq!(container.id, unit.id().into());
        assert_eq!(container.bytes, unit.bytes());
        assert!(container.timestamp > 0);
        assert_eq!(index.get_index(&unit.id().into()).unwrap(), at);
        assert_eq!(index.get_container_by_id(&unit.id().into()).unwrap(), container);
    }
    assert_eq!(index.get_last_accepted().unwrap().id, units[2].id().into());

    // A unit that is delivered twice is only indexed once.
    acceptors.notify(&ctx, &units[1]).unwrap();
    assert_eq!(index.get_last_accepted().unwrap().id, units[2].id().into());
    assert!(matches!(
        index.get_container_by_index(AcceptIndex::new(3)),
        Err(IndexerError::NotFound(_))
    ));
    assert!(matches!(
        index.get_container_by_id(&Unit::genesis().id().into()),
        Err(IndexerError::NotFound(_))
    ));
}

#[test]
fn container_ranges_are_bounded() {
    let index = Index::new(MemDB::new(), CHAIN, Contents::Units(Flavor::Dag));
    let units = units(4);
    let ctx = AcceptContext::new(CHAIN);
    for unit in &units {
        index.accept(&ctx, unit).unwrap();
    }

    let range = index.get_container_range(AcceptIndex::new(1), 2).unwrap();
    assert_eq!(
        range.iter().map(|container| container.id).collect::<Vec<_>>(),
        vec![ContainerID::from(units[1].id()), units[2].id().into()]
    );

    // The range is cut short at the last accepted container.
    assert_eq!(
        index
            .get_container_range(AcceptIndex::new(2), MAX_FETCHED_BY_RANGE)
            .unwrap()
            .len(),
        2
    );

    for (start, count) in [(0, 0), (0, MAX_FETCHED_BY_RANGE + 1), (4, 1), (100, 1)] {
        assert!(matches!(
            index.get_container_range(AcceptIndex::new(start), count),
            Err(IndexerError::InvalidRange(_))
        ));
    }
}

#[test]
fn closed_index_refuses_units() {
    let index = Index::new(MemDB::new(), CHAIN, Contents::Units(Flavor::Linear));
    index.close();
    assert!(matches!(
        index.accept(&AcceptContext::new(CHAIN), &units(1)[0]),
        Err(AcceptorError::Closed)
    ));
    assert!(index.requires_complete_index());
}

#[test]
fn disabling_a_previously_indexed_chain_is_fatal() {
    let kv_store = MemDB::new();
    {
        let (indexer, _) =
            new_indexer(enabled(), kv_store.clone(), Arc::new(AcceptorGroup::new()));
        indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    }

    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, shut_down) = new_indexer(disabled(), kv_store.clone(), acceptors.clone());
    assert!(indexer.has_run_before());

    assert!(matches!(
        indexer.register_chain("C", CHAIN, Flavor::Linear),
        Err(IndexerError::IncompleteIndex { chain, .. }) if chain == CHAIN
    ));
    assert!(indexer.is_closed());
    indexer.wait_for_shutdown();
    assert!(shut_down.load(Ordering::SeqCst));
    assert!(acceptors.listeners(CHAIN).is_empty());
    assert!(!kv_store.index_incomplete(CHAIN));
}

#[test]
fn disabled_indexing_marks_the_chain_incomplete() {
    let kv_store = MemDB::new();
    {
        let acceptors = Arc::new(AcceptorGroup::new());
        let (indexer, _) = new_indexer(disabled(), kv_store.clone(), acceptors.clone());
        indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();

        assert!(acceptors.listeners(CHAIN).is_empty());
        assert!(indexer.get_index(CHAIN).is_none());
        assert!(kv_store.index_incomplete(CHAIN));
        assert!(!indexer.is_closed());
    }

    // Indexing can no longer be enabled...
    let (indexer, shut_down) =
        new_indexer(enabled(), kv_store.clone(), Arc::new(AcceptorGroup::new()));
    assert!(matches!(
        indexer.register_chain("C", CHAIN, Flavor::Linear),
        Err(IndexerError::IncompleteIndex { .. })
    ));
    indexer.wait_for_shutdown();
    assert!(shut_down.load(Ordering::SeqCst));

    // ...unless incomplete indices are allowed.
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, _) = new_indexer(
        IndexerConfig::builder().allow_incomplete_index(true).build(),
        kv_store.clone(),
        acceptors.clone(),
    );
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    assert_eq!(acceptors.listeners(CHAIN), vec![index_name(CHAIN)]);
    assert!(kv_store.previously_indexed(CHAIN));
}

#[test]
fn previously_indexed_chains_may_be_disabled_when_allowed() {
    let kv_store = MemDB::new();
    {
        let (indexer, _) =
            new_indexer(enabled(), kv_store.clone(), Arc::new(AcceptorGroup::new()));
        indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    }

    let (indexer, _) = new_indexer(
        IndexerConfig::builder()
            .indexing_enabled(false)
            .allow_incomplete_index(true)
            .build(),
        kv_store.clone(),
        Arc::new(AcceptorGroup::new()),
    );
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    assert!(!indexer.is_closed());
    assert!(kv_store.index_incomplete(CHAIN));
}

#[test]
fn close_deregisters_every_index() {
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, shut_down) = new_indexer(enabled(), MemDB::new(), acceptors.clone());
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();
    let index = indexer.get_index(CHAIN).unwrap();

    indexer.close().unwrap();
    indexer.close().unwrap();

    assert!(indexer.is_closed());
    assert!(index.is_closed());
    assert!(indexer.get_index(CHAIN).is_none());
    assert!(acceptors.listeners(CHAIN).is_empty());
    assert!(matches!(
        indexer.register_chain("C", CHAIN, Flavor::Linear),
        Err(IndexerError::Closed)
    ));

    indexer.wait_for_shutdown();
    assert!(shut_down.load(Ordering::SeqCst));
}

#[test]
fn accepted_units_reach_the_index() {
    let (kv_store, _) = initialized_store(2);
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, _) = new_indexer(enabled(), kv_store.clone(), acceptors.clone());
    indexer.register_chain("C", CHAIN, Flavor::Linear).unwrap();

    let mut manager = Manager::new(config(), kv_store, acceptors, None, None).unwrap();
    let first = standard(&Unit::genesis(), vec![spend(vec![utxo(0)])]);
    let second = standard(&first, vec![spend(vec![utxo(1)])]);
    manager.verify(first.clone()).unwrap();
    manager.verify(second.clone()).unwrap();
    manager.accept(&first.id()).unwrap();
    manager.accept(&second.id()).unwrap();

    let index = indexer.get_index(CHAIN).unwrap();
    assert_eq!(index.get_index(&first.id().into()).unwrap(), AcceptIndex::new(0));
    assert_eq!(index.get_last_accepted().unwrap().id, second.id().into());
    assert!(indexer.get_transaction_index(CHAIN).is_none());
}

fn transaction_id(transaction: &Transaction) -> ContainerID {
    let mut hasher = CryptoHasher::new();
    hasher.update(transaction.try_to_vec().unwrap());
    ContainerID::new(hasher.finalize().into())
}

#[test]
fn dag_chains_also_index_transactions() {
    let (kv_store, _) = initialized_store(3);
    let acceptors = Arc::new(AcceptorGroup::new());
    let (indexer, shut_down) = new_indexer(enabled(), kv_store.clone(), acceptors.clone());
    indexer.register_chain("X", CHAIN, Flavor::Dag).unwrap();
    assert_eq!(
        acceptors.listeners(CHAIN),
        vec![index_name(CHAIN), transaction_index_name(CHAIN)]
    );
    assert_eq!(transaction_index_name(CHAIN), "tx-index-1");

    let mut manager = Manager::new(config(), kv_store, acceptors.clone(), None, None).unwrap();
    let first_txs = vec![spend(vec![utxo(0)]), create(b"k".to_vec(), b"v")];
    let second_txs = vec![spend(vec![utxo(1), utxo(2)])];
    let first = vertex(&Unit::genesis(), Vec::new(), first_txs.clone());
    let second = vertex(&first, vec![Unit::genesis().id()], second_txs.clone());
    manager.verify(first.clone()).unwrap();
    manager.verify(second.clone()).unwrap();
    manager.accept(&first.id()).unwrap();
    manager.accept(&second.id()).unwrap();

    // Vertices and transactions are numbered separately.
    let vertices = indexer.get_index(CHAIN).unwrap();
    assert_eq!(vertices.get_index(&second.id().into()).unwrap(), AcceptIndex::new(1));

    let transactions = indexer.get_transaction_index(CHAIN).unwrap();
    assert_eq!(transactions.contents(), Contents::Transactions);
    let accepted: Vec<&Transaction> = first_txs.iter().chain(second_txs.iter()).collect();
    for (i, transaction) in accepted.iter().enumerate() {
        let id = transaction_id(transaction);
        assert_eq!(transactions.get_index(&id).unwrap(), AcceptIndex::new(i as u64));
        let container = transactions.get_container_by_id(&id).unwrap();
        assert_eq!(container.bytes, transaction.try_to_vec().unwrap());
    }
    assert_eq!(
        transactions.get_last_accepted().unwrap().id,
        transaction_id(&second_txs[0])
    );
    assert!(matches!(
        transactions.get_index(&first.id().into()),
        Err(IndexerError::NotFound(_))
    ));

    // Both indices are closed together.
    indexer.close().unwrap();
    assert!(vertices.is_closed());
    assert!(transactions.is_closed());
    assert!(acceptors.listeners(CHAIN).is_empty());
    indexer.wait_for_shutdown();
    assert!(shut_down.load(Ordering::SeqCst));
}

#[test]
fn transactions_are_indexed_once() {
    let index = Index::new(MemDB::new(), CHAIN, Contents::Transactions);
    let transaction = spend(vec![utxo(0)]);
    let ctx = AcceptContext::new(CHAIN);

    let genesis = Unit::genesis();
    index
        .accept(&ctx, &vertex(&genesis, Vec::new(), vec![transaction.clone()]))
        .unwrap();
    index
        .accept(&ctx, &standard(&genesis, vec![transaction.clone()]))
        .unwrap();

    assert_eq!(
        index.get_index(&transaction_id(&transaction)).unwrap(),
        AcceptIndex::new(0)
    );
    assert!(matches!(
        index.get_container_by_index(AcceptIndex::new(1)),
        Err(IndexerError::NotFound(_))
    ));
}
