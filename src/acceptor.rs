/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-chain publish/subscribe of accepted units.
//!
//! # Listeners
//!
//! Anything that wants to learn about accepted units implements [`Acceptor`] and is registered on
//! an [`AcceptorGroup`] under a name that is unique per chain. Each listener receives every unit
//! accepted on its chain after it was registered exactly once, in the order the units were accepted,
//! until it is deregistered.
//!
//! # Sharing
//!
//! One `AcceptorGroup` is shared, behind an `Arc`, by every chain a node runs. Notification holds the
//! group's read lock for its whole duration, so a deregistration, which takes the write lock, waits
//! for every in-flight notification to finish. For the same reason, a listener must not register or
//! deregister listeners from inside [`Acceptor::accept`].
//!
//! # Deregistration
//!
//! Deregistration happens in two phases:
//! 1. Under the write lock, the registration is marked as draining. From this point on the listener
//!    is never notified again.
//! 2. Outside the lock, the listener's [`on_deregister`](Acceptor::on_deregister) cleanup runs, and
//!    then the registration is removed.
//!
//! While a registration is draining, a new listener with the same name may or may not be registered,
//! depending on the `tolerate_deregistering` argument of
//! [`register_acceptor`](AcceptorGroup::register_acceptor).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::SystemTime,
};

use crate::{
    logging::{secs_since_unix_epoch, DEREGISTER_ACCEPTOR, REGISTER_ACCEPTOR},
    storage::pluggables::{KVGetError, KVSetError, StorageError},
    types::{
        data_types::{ChainID, UnitID},
        unit::Unit,
    },
};

/// Information passed to a listener together with each accepted unit.
#[derive(Clone, Debug)]
pub struct AcceptContext {
    pub chain_id: ChainID,
    pub accepted_at: SystemTime,
}

impl AcceptContext {
    pub fn new(chain_id: ChainID) -> AcceptContext {
        AcceptContext {
            chain_id,
            accepted_at: SystemTime::now(),
        }
    }
}

/// A listener that is notified of accepted units.
pub trait Acceptor: Send + Sync {
    /// Called once for every unit accepted on the listener's chain, after the unit's diff has been
    /// committed to durable storage.
    fn accept(&self, ctx: &AcceptContext, unit: &Unit) -> Result<(), AcceptorError>;

    /// Called once when the listener is deregistered, after it has received its last unit.
    fn on_deregister(&self) -> Result<(), AcceptorError> {
        Ok(())
    }

    /// Whether missing a unit would leave this listener permanently incomplete.
    ///
    /// Repeated failures of such a listener are fatal to the chain. See
    /// [`NotifyError::is_fatal`].
    fn requires_complete_index(&self) -> bool {
        false
    }
}

/// Errors that a listener may return.
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    KVGetError(#[from] KVGetError),

    #[error(transparent)]
    KVSetError(#[from] KVSetError),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error("listener is closed")]
    Closed,
}

struct Registration {
    name: String,
    listener: Arc<dyn Acceptor>,
    draining: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl Registration {
    fn is_active(&self) -> bool {
        !self.draining.load(Ordering::SeqCst)
    }
}

/// Registry of the listeners of every chain on a node.
#[derive(Default)]
pub struct AcceptorGroup {
    registrations: RwLock<HashMap<ChainID, Vec<Arc<Registration>>>>,
}

impl AcceptorGroup {
    pub fn new() -> AcceptorGroup {
        AcceptorGroup {
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// Register `listener` on `chain` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateListener`] if an active listener named `name` is already
    /// registered on `chain`, or if one is being deregistered and `tolerate_deregistering` is false.
    pub fn register_acceptor(
        &self,
        chain: ChainID,
        name: impl Into<String>,
        listener: Arc<dyn Acceptor>,
        tolerate_deregistering: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut registrations = self.write();
        let entries = registrations.entry(chain).or_default();

        let duplicate = entries.iter().any(|entry| {
            entry.name == name && (entry.is_active() || !tolerate_deregistering)
        });
        if duplicate {
            return Err(RegistryError::DuplicateListener { chain, name });
        }

        entries.push(Arc::new(Registration {
            name: name.clone(),
            listener,
            draining: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }));

        log::info!(
            "{}, {}, {}, {}",
            REGISTER_ACCEPTOR,
            secs_since_unix_epoch(SystemTime::now()),
            chain,
            name
        );
        Ok(())
    }

    /// Deregister the active listener named `name` from `chain`, and run its cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no active listener named `name` is registered on
    /// `chain`, and [`RegistryError::Cleanup`] if the listener's cleanup failed. In the latter case
    /// the listener is deregistered anyway.
    pub fn deregister_acceptor(&self, chain: ChainID, name: &str) -> Result<(), RegistryError> {
        // Phase 1: stop notifying the listener.
        let registration = {
            let registrations = self.write();
            let registration = registrations
                .get(&chain)
                .and_then(|entries| {
                    entries
                        .iter()
                        .find(|entry| entry.name == name && entry.is_active())
                })
                .cloned()
                .ok_or_else(|| RegistryError::NotFound {
                    chain,
                    name: name.to_string(),
                })?;
            registration.draining.store(true, Ordering::SeqCst);
            registration
        };

        // Phase 2: clean up outside the lock, then forget the registration.
        let cleanup = registration.listener.on_deregister();
        {
            let mut registrations = self.write();
            if let Some(entries) = registrations.get_mut(&chain) {
                entries.retain(|entry| !Arc::ptr_eq(entry, &registration));
                if entries.is_empty() {
                    registrations.remove(&chain);
                }
            }
        }

        log::info!(
            "{}, {}, {}, {}",
            DEREGISTER_ACCEPTOR,
            secs_since_unix_epoch(SystemTime::now()),
            chain,
            name
        );
        cleanup.map_err(|source| RegistryError::Cleanup {
            chain,
            name: name.to_string(),
            source,
        })
    }

    /// Notify every active listener of `ctx.chain_id`, in registration order, that `unit` was
    /// accepted.
    ///
    /// A failing listener does not prevent later listeners from being notified. All failures are
    /// collected into the returned [`NotifyError`].
    pub fn notify(&self, ctx: &AcceptContext, unit: &Unit) -> Result<(), NotifyError> {
        let registrations = self.read();
        let mut failures = Vec::new();

        if let Some(entries) = registrations.get(&ctx.chain_id) {
            for entry in entries.iter().filter(|entry| entry.is_active()) {
                match entry.listener.accept(ctx, unit) {
                    Ok(()) => entry.consecutive_failures.store(0, Ordering::SeqCst),
                    Err(error) => {
                        let consecutive_failures =
                            entry.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        log::warn!(
                            "listener {} of chain {} failed to accept unit {}: {}",
                            entry.name,
                            ctx.chain_id,
                            unit.id(),
                            error
                        );
                        failures.push(ListenerFailure {
                            name: entry.name.clone(),
                            unit: unit.id(),
                            error,
                            critical: entry.listener.requires_complete_index(),
                            consecutive_failures,
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError {
                chain: ctx.chain_id,
                failures,
            })
        }
    }

    /// Get the names of the listeners of `chain` that are currently being notified, in registration
    /// order.
    pub fn listeners(&self, chain: ChainID) -> Vec<String> {
        self.read()
            .get(&chain)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.is_active())
                    .map(|entry| entry.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // Every mutation of the registry is a single push, flag store, or retain, so the map is
    // consistent even if a thread panicked while holding the lock.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChainID, Vec<Arc<Registration>>>> {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChainID, Vec<Arc<Registration>>>> {
        self.registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Errors that may arise when registering or deregistering listeners.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("listener {name} is already registered on chain {chain}")]
    DuplicateListener { chain: ChainID, name: String },

    #[error("no listener named {name} is registered on chain {chain}")]
    NotFound { chain: ChainID, name: String },

    #[error("cleanup of listener {name} on chain {chain} failed: {source}")]
    Cleanup {
        chain: ChainID,
        name: String,
        source: AcceptorError,
    },
}

/// One listener's failure to accept one unit.
#[derive(Debug)]
pub struct ListenerFailure {
    pub name: String,
    pub unit: UnitID,
    pub error: AcceptorError,

    /// Whether the listener [requires a complete index](Acceptor::requires_complete_index).
    pub critical: bool,

    /// How many notifications in a row, including this one, the listener has failed.
    pub consecutive_failures: u32,
}

/// The failures of every listener that failed during one or more notifications.
#[derive(Debug, thiserror::Error)]
#[error("{} listener failure(s) on chain {}", .failures.len(), .chain)]
pub struct NotifyError {
    pub chain: ChainID,
    pub failures: Vec<ListenerFailure>,
}

impl NotifyError {
    /// Whether some critical listener has now failed at least `critical_failure_threshold` times in
    /// a row.
    pub fn is_fatal(&self, critical_failure_threshold: u32) -> bool {
        self.failures.iter().any(|failure| {
            failure.critical && failure.consecutive_failures >= critical_failure_threshold
        })
    }

    pub(crate) fn absorb(&mut self, other: NotifyError) {
        self.failures.extend(other.failures);
    }
}
