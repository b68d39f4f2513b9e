/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Node-wide indexing of accepted containers.
//!
//! The [`Indexer`] decides, for each chain the node runs, whether to index the chain's accepted
//! containers, and if so registers an [`Index`] listener for it. DAG chains get a second index, of
//! the transactions their accepted vertices carry.
//!
//! An index is only useful if it is complete, that is, if it contains every container accepted since
//! the chain was first indexed. Running a previously indexed chain with indexing disabled would make
//! its index incomplete, and so would enabling indexing on a node that already ran the chain without
//! it. Unless incomplete indices are explicitly allowed, both are fatal: the indexer closes itself,
//! and runs the node's shutdown action.
//!
//! The indexer persists three markers in durable storage:
//!
//! |Marker|Written when|
//! |---|---|
//! |Node has run|The first indexer is created on the store.|
//! |Chain previously indexed|A chain is registered with indexing enabled.|
//! |Chain index incomplete|A chain is registered with indexing disabled.|

pub mod index;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
};

use typed_builder::TypedBuilder;

use crate::{
    acceptor::{AcceptorGroup, RegistryError},
    engine::Flavor,
    storage::{
        durable::DurableWriteBatch,
        pluggables::{KVGetError, KVSetError, KVStore, StorageError},
    },
    types::data_types::ChainID,
};

use self::index::{Contents, Index};

/// Action that stops the node. Run on a background thread when the indexer closes.
pub type ShutdownAction = Box<dyn FnOnce() + Send>;

#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building an [IndexerConfig]. On the builder call the following methods to construct a valid [IndexerConfig].

    Optional:
    - `.indexing_enabled(...)`
    - `.allow_incomplete_index(...)`
"))]
pub struct IndexerConfig {
    #[builder(default = true, setter(doc = "Index the accepted containers of every registered chain? Optional, defaults to true."))]
    pub indexing_enabled: bool,
    #[builder(default = false, setter(doc = "Keep running if a chain's index is or would become incomplete? Optional, defaults to false."))]
    pub allow_incomplete_index: bool,
}

pub struct Indexer<K: KVStore> {
    config: IndexerConfig,
    acceptors: Arc<AcceptorGroup>,
    has_run_before: bool,
    inner: Mutex<IndexerInner<K>>,
}

struct IndexerInner<K: KVStore> {
    kv_store: K,
    closed: bool,
    indices: HashMap<ChainID, Vec<Arc<Index<K>>>>,
    shutdown_action: Option<ShutdownAction>,
    shutdown_thread: Option<JoinHandle<()>>,
}

impl<K: KVStore> Indexer<K> {
    /// Create an indexer, and record in `kv_store` that the node has run.
    pub fn new(
        config: IndexerConfig,
        mut kv_store: K,
        acceptors: Arc<AcceptorGroup>,
        shutdown_action: impl FnOnce() + Send + 'static,
    ) -> Result<Indexer<K>, IndexerError> {
        let has_run_before = kv_store.has_run();
        if !has_run_before {
            let mut wb = DurableWriteBatch::new();
            wb.set_has_run();
            kv_store.write(wb.into_inner())?;
        }

        Ok(Indexer {
            config,
            acceptors,
            has_run_before,
            inner: Mutex::new(IndexerInner {
                kv_store,
                closed: false,
                indices: HashMap::new(),
                shutdown_action: Some(Box::new(shutdown_action)),
                shutdown_thread: None,
            }),
        })
    }

    /// Whether the node had run on this store before this indexer was created.
    pub fn has_run_before(&self) -> bool {
        self.has_run_before
    }

    /// Start indexing `chain`, if the configuration and the chain's history allow it.
    ///
    /// Returns `Ok` both when an index was registered and when indexing is disabled and the chain
    /// was only marked incomplete. Registering a chain that is already indexed does nothing.
    ///
    /// # Errors
    ///
    /// - [`IndexerError::Closed`] if the indexer is closed.
    /// - [`IndexerError::IncompleteIndex`] if running the chain would leave it with an incomplete
    ///   index, and incomplete indices are not allowed. The indexer is closed.
    /// - Storage and registry errors. The indexer is closed.
    pub fn register_chain(
        &self,
        name: &str,
        chain: ChainID,
        flavor: Flavor,
    ) -> Result<(), IndexerError> {
        let mut inner = self.lock();
        if inner.closed {
            log::debug!("not registering chain {} to indexer: indexer is closed", name);
            return Err(IndexerError::Closed);
        }
        if inner.indices.contains_key(&chain) {
            log::warn!("chain {} ({}) is already being indexed", name, chain);
            return Ok(());
        }

        match self.register_chain_locked(&mut inner, name, chain, flavor) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::error!("failed to register chain {} to indexer: {}", name, err);
                if let Err(close_err) = self.close_locked(&mut inner) {
                    log::error!("failed to close indexer: {}", close_err);
                }
                Err(err)
            }
        }
    }

    /// Get the index of the accepted units of `chain`, if it is being indexed.
    pub fn get_index(&self, chain: ChainID) -> Option<Arc<Index<K>>> {
        self.find_index(chain, |contents| matches!(contents, Contents::Units(_)))
    }

    /// Get the index of the accepted transactions of `chain`, if it is a DAG chain that is being
    /// indexed.
    pub fn get_transaction_index(&self, chain: ChainID) -> Option<Arc<Index<K>>> {
        self.find_index(chain, |contents| contents == Contents::Transactions)
    }

    /// Stop indexing every chain, and run the shutdown action on a background thread.
    ///
    /// Closing an indexer that is already closed does nothing. Every index is deregistered even if
    /// deregistering another failed; the first failure is returned.
    pub fn close(&self) -> Result<(), IndexerError> {
        let mut inner = self.lock();
        self.close_locked(&mut inner)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block until the shutdown action started by [`close`](Self::close) has finished. Returns
    /// immediately if the indexer was never closed.
    pub fn wait_for_shutdown(&self) {
        let shutdown_thread = self.lock().shutdown_thread.take();
        if let Some(shutdown_thread) = shutdown_thread {
            if shutdown_thread.join().is_err() {
                log::error!("indexer shutdown action panicked");
            }
        }
    }

    fn register_chain_locked(
        &self,
        inner: &mut IndexerInner<K>,
        name: &str,
        chain: ChainID,
        flavor: Flavor,
    ) -> Result<(), IndexerError> {
        let is_incomplete = inner.kv_store.index_incomplete(chain);
        let previously_indexed = inner.kv_store.previously_indexed(chain);

        if !self.config.indexing_enabled {
            if previously_indexed && !self.config.allow_incomplete_index {
                return Err(IndexerError::IncompleteIndex {
                    chain,
                    reason: "running with indexing disabled would make the index incomplete",
                });
            }
            if !is_incomplete {
                let mut wb = DurableWriteBatch::new();
                wb.set_index_incomplete(chain);
                inner.kv_store.write(wb.into_inner())?;
            }
            log::info!("indexing is disabled; chain {} ({}) is not indexed", name, chain);
            return Ok(());
        }

        if !self.config.allow_incomplete_index
            && is_incomplete
            && (previously_indexed || self.has_run_before)
        {
            return Err(IndexerError::IncompleteIndex {
                chain,
                reason: "the index is incomplete",
            });
        }

        if !previously_indexed {
            let mut wb = DurableWriteBatch::new();
            wb.set_previously_indexed(chain);
            inner.kv_store.write(wb.into_inner())?;
        }

        let mut contents = vec![Contents::Units(flavor)];
        if flavor == Flavor::Dag {
            contents.push(Contents::Transactions);
        }
        for contents in contents {
            let index = Arc::new(Index::new(inner.kv_store.clone(), chain, contents));
            self.acceptors
                .register_acceptor(chain, index.name(), index.clone(), false)?;
            inner.indices.entry(chain).or_default().push(index);

            log::info!(
                "indexing {}s of chain {} ({})",
                contents.container_name(),
                name,
                chain
            );
        }
        Ok(())
    }

    fn close_locked(&self, inner: &mut IndexerInner<K>) -> Result<(), IndexerError> {
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        let mut result = Ok(());
        for (chain, index) in inner
            .indices
            .drain()
            .flat_map(|(chain, indices)| indices.into_iter().map(move |index| (chain, index)))
        {
            index.close();
            if let Err(err) = self.acceptors.deregister_acceptor(chain, &index.name()) {
                log::error!(
                    "failed to deregister the {} index of chain {}: {}",
                    index.contents().container_name(),
                    chain,
                    err
                );
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }

        if let Some(shutdown_action) = inner.shutdown_action.take() {
            inner.shutdown_thread = Some(thread::spawn(shutdown_action));
        }
        result
    }

    fn find_index(
        &self,
        chain: ChainID,
        wanted: impl Fn(Contents) -> bool,
    ) -> Option<Arc<Index<K>>> {
        self.lock()
            .indices
            .get(&chain)?
            .iter()
            .find(|index| wanted(index.contents()))
            .cloned()
    }

    // The inner state is only ever mutated by single inserts, drains and flag stores.
    fn lock(&self) -> MutexGuard<'_, IndexerInner<K>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: KVStore> Drop for Indexer<K> {
    fn drop(&mut self) {
        self.wait_for_shutdown();
    }
}

/// Name under which the index of the units of `chain` is registered as a listener.
pub fn index_name(chain: ChainID) -> String {
    format!("index-{}", chain)
}

/// Name under which the index of the transactions of `chain` is registered as a listener.
pub fn transaction_index_name(chain: ChainID) -> String {
    format!("tx-index-{}", chain)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Running the chain would leave its index incomplete, and incomplete indices are not allowed.
    #[error("index of chain {chain} is incomplete: {reason}")]
    IncompleteIndex {
        chain: ChainID,
        reason: &'static str,
    },

    #[error("indexer is closed")]
    Closed,

    #[error("{0}")]
    NotFound(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    KVGetError(#[from] KVGetError),

    #[error(transparent)]
    KVSetError(#[from] KVSetError),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
