/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The accepted containers of one chain, in accept order.
//!
//! An [`Index`] is an [`Acceptor`]: it learns about accepted units by being notified of them, and
//! gives each container the next [`AcceptIndex`] of the index. Depending on its [`Contents`], an
//! index stores either the accepted units themselves, or the transactions they carry. It stores,
//! for each container:
//!
//! |Key|Value|
//! |---|---|
//! |Accept index|[`Container`]|
//! |Container ID|Accept index|
//!
//! plus the next accept index. The containers of one accepted unit are written in one atomic write.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    acceptor::{AcceptContext, Acceptor, AcceptorError},
    engine::Flavor,
    storage::{
        durable::DurableWriteBatch,
        pluggables::KVStore,
        variables::concat,
    },
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{AcceptIndex, ChainID, ContainerID},
        transaction::Transaction,
        unit::{Unit, UnitBody},
    },
};

use super::{index_name, transaction_index_name, IndexerError};

/// Maximum number of containers that [`Index::get_container_range`] returns.
pub const MAX_FETCHED_BY_RANGE: u64 = 1024;

/// An accepted unit or transaction, as stored in an index.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Container {
    pub id: ContainerID,
    pub bytes: Vec<u8>,

    /// Nanoseconds since the Unix epoch at which the unit was accepted.
    pub timestamp: u64,
}

/// What the containers of an index are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Contents {
    /// The accepted units of a chain of the given flavor.
    Units(Flavor),

    /// The transactions carried by the accepted `Standard` and `Vertex` units of a chain.
    Transactions,
}

impl Contents {
    pub fn container_name(&self) -> &'static str {
        match self {
            Contents::Units(flavor) => flavor.container_name(),
            Contents::Transactions => "transaction",
        }
    }

    /// Prefix that keeps the storage keys of the indices of `chain` apart.
    pub(crate) fn key_prefix(&self, chain: ChainID) -> Vec<u8> {
        let tag = match self {
            Contents::Units(_) => 0,
            Contents::Transactions => 1,
        };
        concat(&chain.to_le_bytes(), &[tag])
    }
}

pub struct Index<K: KVStore> {
    chain: ChainID,
    contents: Contents,
    kv_store: Mutex<K>,
    closed: AtomicBool,
}

impl<K: KVStore> Index<K> {
    pub fn new(kv_store: K, chain: ChainID, contents: Contents) -> Index<K> {
        Index {
            chain,
            contents,
            kv_store: Mutex::new(kv_store),
            closed: AtomicBool::new(false),
        }
    }

    pub fn chain(&self) -> ChainID {
        self.chain
    }

    pub fn contents(&self) -> Contents {
        self.contents
    }

    /// Name under which this index is registered as a listener.
    pub fn name(&self) -> String {
        match self.contents {
            Contents::Units(_) => index_name(self.chain),
            Contents::Transactions => transaction_index_name(self.chain),
        }
    }

    /// Stop indexing. Every later notification fails with [`AcceptorError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn get_container_by_index(&self, index: AcceptIndex) -> Result<Container, IndexerError> {
        self.store()
            .indexed_container(self.chain, self.contents, index)?
            .ok_or_else(|| IndexerError::NotFound(format!("no container at index {}", index.int())))
    }

    pub fn get_container_by_id(&self, container: &ContainerID) -> Result<Container, IndexerError> {
        let store = self.store();
        let index = store
            .container_index(self.chain, self.contents, container)?
            .ok_or_else(|| {
                IndexerError::NotFound(format!("container {} is not indexed", container))
            })?;
        store
            .indexed_container(self.chain, self.contents, index)?
            .ok_or_else(|| IndexerError::NotFound(format!("no container at index {}", index.int())))
    }

    /// Get the accept index of the container `container`.
    pub fn get_index(&self, container: &ContainerID) -> Result<AcceptIndex, IndexerError> {
        self.store()
            .container_index(self.chain, self.contents, container)?
            .ok_or_else(|| {
                IndexerError::NotFound(format!("container {} is not indexed", container))
            })
    }

    /// Get the most recently accepted container.
    pub fn get_last_accepted(&self) -> Result<Container, IndexerError> {
        let store = self.store();
        let next = store.next_accept_index(self.chain, self.contents)?;
        if next.int() == 0 {
            return Err(IndexerError::NotFound(
                "no containers have been accepted".to_string(),
            ));
        }
        let last = AcceptIndex::new(next.int() - 1);
        store
            .indexed_container(self.chain, self.contents, last)?
            .ok_or_else(|| IndexerError::NotFound(format!("no container at index {}", last.int())))
    }

    /// Get up to `count` containers, in accept order, starting with the one at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::InvalidRange`] if `count` is 0 or more than
    /// [`MAX_FETCHED_BY_RANGE`], or if no container has been accepted at `start` yet.
    pub fn get_container_range(
        &self,
        start: AcceptIndex,
        count: u64,
    ) -> Result<Vec<Container>, IndexerError> {
        if count == 0 || count > MAX_FETCHED_BY_RANGE {
            return Err(IndexerError::InvalidRange(format!(
                "count is {}, but must be in [1, {}]",
                count, MAX_FETCHED_BY_RANGE
            )));
        }

        let store = self.store();
        let next = store.next_accept_index(self.chain, self.contents)?;
        if start >= next {
            return Err(IndexerError::InvalidRange(format!(
                "start is {}, but only {} containers have been accepted",
                start.int(),
                next.int()
            )));
        }

        let end = start.int() + count.min(next.int() - start.int());
        (start.int()..end)
            .map(|index| {
                let index = AcceptIndex::new(index);
                store.indexed_container(self.chain, self.contents, index)?.ok_or_else(|| {
                    IndexerError::NotFound(format!("no container at index {}", index.int()))
                })
            })
            .collect()
    }

    // The containers that accepting `unit` adds to this index.
    fn containers(
        &self,
        ctx: &AcceptContext,
        unit: &Unit,
    ) -> Result<Vec<Container>, AcceptorError> {
        let timestamp = nanos_since_unix_epoch(ctx.accepted_at);
        match self.contents {
            Contents::Units(_) => Ok(vec![Container {
                id: unit.id().into(),
                bytes: unit.bytes().to_vec(),
                timestamp,
            }]),
            Contents::Transactions => transactions(unit)
                .iter()
                .map(|transaction| -> Result<Container, AcceptorError> {
                    let bytes = transaction.try_to_vec().map_err(|err| {
                        AcceptorError::Failed(format!("failed to serialize transaction: {}", err))
                    })?;
                    Ok(Container {
                        id: transaction_id(&bytes),
                        bytes,
                        timestamp,
                    })
                })
                .collect(),
        }
    }

    // Every write to the index is a single atomic write, so the store is consistent even if a thread
    // panicked while holding the lock.
    fn store(&self) -> MutexGuard<'_, K> {
        self.kv_store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: KVStore> Acceptor for Index<K> {
    fn accept(&self, ctx: &AcceptContext, unit: &Unit) -> Result<(), AcceptorError> {
        if self.is_closed() {
            return Err(AcceptorError::Closed);
        }

        let containers = self.containers(ctx, unit)?;

        let mut store = self.store();
        let first = store.next_accept_index(self.chain, self.contents)?;
        let mut next = first;
        let mut indexed = Vec::new();
        let mut wb = DurableWriteBatch::new();
        for container in &containers {
            if indexed.contains(&container.id)
                || store
                    .container_index(self.chain, self.contents, &container.id)?
                    .is_some()
            {
                log::debug!(
                    "{} {} of chain {} is already indexed",
                    self.contents.container_name(),
                    container.id,
                    self.chain
                );
                continue;
            }
            wb.set_indexed_container(self.chain, self.contents, next, container)?;
            wb.set_container_index(self.chain, self.contents, &container.id, next)?;
            indexed.push(container.id);
            next = AcceptIndex::new(next.int() + 1);
        }
        if indexed.is_empty() {
            return Ok(());
        }
        wb.set_next_accept_index(self.chain, self.contents, next)?;
        store.write(wb.into_inner())?;

        log::debug!(
            "indexed {} {}(s) of unit {} of chain {} at {}..{}",
            indexed.len(),
            self.contents.container_name(),
            unit.id(),
            self.chain,
            first.int(),
            next.int()
        );
        Ok(())
    }

    fn on_deregister(&self) -> Result<(), AcceptorError> {
        self.close();
        Ok(())
    }

    fn requires_complete_index(&self) -> bool {
        true
    }
}

fn transactions(unit: &Unit) -> &[Transaction] {
    match unit.body() {
        UnitBody::Standard { transactions } | UnitBody::Vertex { transactions, .. } => {
            transactions.as_slice()
        }
        _ => &[],
    }
}

fn transaction_id(bytes: &[u8]) -> ContainerID {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    ContainerID::new(hasher.finalize().into())
}

fn nanos_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as u64)
        .unwrap_or_default()
}
