/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pending-decision manager of one chain.
//!
//! # Pending units
//!
//! The manager keeps every verified-but-undecided unit in memory, together with the diff produced
//! by executing it. The pending units of a chain form a tree rooted at the last accepted unit:
//!
//! ```text
//!                      ┌── S2 ── S3
//!   last accepted ─────┤
//!                      └── P1 ──┬── Commit ── S4
//!                               └── Abort
//! ```
//!
//! A unit leaves the tree in one of two ways:
//! 1. It is [accepted](Manager::accept). Its diff is committed to durable storage together with the
//!    unit itself, and it becomes the new last accepted unit.
//! 2. It is [rejected](Manager::reject). Its diff, and the diffs of all of its pending descendants,
//!    are dropped.
//!
//! # Proposals
//!
//! A `Proposal` is never decided directly. It is accepted together with whichever of its `Commit`
//! or `Abort` children is accepted, in a single durable write, and at that point the other option
//! and its descendants are rejected automatically. A later call to [`reject`](Manager::reject) on an
//! automatically rejected unit succeeds without doing anything.
//!
//! # Fatal errors
//!
//! If durable storage fails to commit an accept, or a listener that requires a complete index fails
//! too many times in a row, the manager halts: it publishes a
//! [`HaltChainEvent`](crate::events::HaltChainEvent), calls the configured fatal hook, and from then
//! on returns [`ManagerError::Halted`] from every operation.

pub mod errors;

pub mod handle;

pub(crate) mod state;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    acceptor::{AcceptContext, AcceptorGroup, NotifyError},
    chain::Configuration,
    diff::{proposal::ProposalOption, VersionedState, Versions},
    events::{AcceptUnitEvent, Event, HaltChainEvent, RejectUnitEvent, VerifyUnitEvent},
    storage::{
        durable::{DurableState, DurableWriteBatch},
        pluggables::KVStore,
    },
    types::{
        data_types::{ChainID, ChildrenList, StateKey, StateValue, UnitHeight, UnitID},
        unit::{Unit, UnitBody},
    },
};

use self::{
    errors::ManagerError,
    handle::{UnitHandle, UnitStatus},
    state::{Execution, Executor, PendingUnit, RejectedUnit},
};

/// Hook invoked, with the ID of the chain and the reason, when a chain halts.
pub type FatalHook = Box<dyn Fn(ChainID, &str) + Send>;

pub struct Manager<K: KVStore> {
    config: Configuration,
    durable: DurableState<K>,
    acceptors: Arc<AcceptorGroup>,

    // Verified, undecided units.
    pending: HashMap<UnitID, PendingUnit>,

    // Pending children of pending units and of the last accepted unit.
    children: HashMap<UnitID, ChildrenList>,

    // Pending vertices that reference each pending unit through an edge.
    referenced_by: HashMap<UnitID, ChildrenList>,

    // Which pending unit consumes each input.
    consumed_by: HashMap<StateKey, UnitID>,

    // Recently rejected units, retained for status queries.
    rejected: HashMap<UnitID, RejectedUnit>,

    // Recently accepted units, oldest first. Always ends with `last_accepted`.
    accepted_cache: VecDeque<Unit>,

    last_accepted: Unit,
    event_publisher: Option<Sender<Event>>,
    on_fatal: Option<FatalHook>,
    halted: Option<String>,
}

/// Lifecycle methods.
impl<K: KVStore> Manager<K> {
    /// Create a manager on top of `kv_store`, resuming from the last accepted unit it contains.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Uninitialized`] if the store was never
    /// [initialized](crate::chain::Chain::initialize).
    pub fn new(
        config: Configuration,
        kv_store: K,
        acceptors: Arc<AcceptorGroup>,
        event_publisher: Option<Sender<Event>>,
        on_fatal: Option<FatalHook>,
    ) -> Result<Manager<K>, ManagerError> {
        let durable = DurableState::new(kv_store);
        if !durable.is_initialized() {
            return Err(ManagerError::Uninitialized);
        }
        let last_accepted = durable.last_accepted_unit()?;

        let mut children = HashMap::new();
        children.insert(last_accepted.id(), ChildrenList::default());

        Ok(Manager {
            config,
            durable,
            acceptors,
            pending: HashMap::new(),
            children,
            referenced_by: HashMap::new(),
            consumed_by: HashMap::new(),
            rejected: HashMap::new(),
            accepted_cache: VecDeque::from([last_accepted.clone()]),
            last_accepted,
            event_publisher,
            on_fatal,
            halted: None,
        })
    }

    pub fn chain_id(&self) -> ChainID {
        self.config.chain_id
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Get the reason the chain halted, if it has.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }
}

/// Decision methods.
impl<K: KVStore> Manager<K> {
    /// Get a unit by ID, from the pending units, the recently decided units, or durable storage, in
    /// that order.
    pub fn get_unit(&self, unit: &UnitID) -> Result<UnitHandle<'_, K>, ManagerError> {
        if let Some(pending) = self.pending.get(unit) {
            return Ok(UnitHandle::new(
                self,
                pending.unit.clone(),
                UnitStatus::Processing,
            ));
        }
        if let Some(accepted) = self.cached_accepted(unit) {
            return Ok(UnitHandle::new(self, accepted.clone(), UnitStatus::Accepted));
        }
        if let Some(rejected) = self.rejected.get(unit) {
            return Ok(UnitHandle::new(
                self,
                rejected.unit.clone(),
                UnitStatus::Rejected,
            ));
        }
        match self.durable.unit(unit)? {
            Some(accepted) => Ok(UnitHandle::new(self, accepted, UnitStatus::Accepted)),
            None => Err(ManagerError::NotFound { unit: *unit }),
        }
    }

    /// Verify `unit` and, if it is valid, make it pending.
    ///
    /// Verifying a unit that is already pending or accepted succeeds without doing anything. A unit
    /// that fails verification is never made pending, and a rejected unit never becomes pending
    /// again.
    pub fn verify(&mut self, unit: Unit) -> Result<(), ManagerError> {
        self.ensure_running()?;

        if self.pending.contains_key(&unit.id()) || self.is_accepted(&unit.id()) {
            return Ok(());
        }
        if self.rejected.contains_key(&unit.id()) {
            return Err(ManagerError::AlreadyRejected { unit: unit.id() });
        }

        unit.verify_syntax(self.config.max_unit_size)?;

        let parent = self.resolve_parent(&unit)?;
        let expected = parent.height() + 1;
        if unit.height() != expected {
            return Err(ManagerError::InvalidHeight {
                expected,
                actual: unit.height(),
            });
        }
        if let (Some(parent_timestamp), Some(timestamp)) = (parent.timestamp(), unit.timestamp()) {
            if timestamp < parent_timestamp {
                return Err(ManagerError::InvalidTimestamp {
                    parent: parent_timestamp,
                    child: timestamp,
                });
            }
        }

        let execution = unit.visit(&mut Executor {
            manager: self,
            parent: &parent,
        })?;
        let pending = PendingUnit { unit, execution };

        let consumed = pending.consumed();
        if let Some(key) = consumed
            .iter()
            .find(|key| self.consumed_by.contains_key(*key))
        {
            return Err(ManagerError::DoubleSpend { key: key.clone() });
        }

        let id = pending.unit.id();
        for key in consumed {
            self.consumed_by.insert(key, id);
        }
        self.children
            .entry(pending.unit.parent())
            .or_default()
            .push(id);
        for edge in edges(&pending.unit) {
            if self.pending.contains_key(edge) {
                self.referenced_by.entry(*edge).or_default().push(id);
            }
        }

        Event::publish(
            &self.event_publisher,
            Event::VerifyUnit(VerifyUnitEvent {
                timestamp: SystemTime::now(),
                chain: self.config.chain_id,
                unit: id,
                height: pending.unit.height(),
                kind: pending.unit.kind(),
            }),
        );
        self.pending.insert(id, pending);

        Ok(())
    }

    /// Accept the pending unit `unit`.
    ///
    /// The unit's diff is committed to durable storage in one atomic write, together with the unit,
    /// its height, and the new last accepted unit. The other pending children of the previous last
    /// accepted unit can then never be accepted, so they are rejected together with their
    /// descendants. Then every listener of the chain is notified.
    ///
    /// Accepting a `Commit` or `Abort` also accepts its parent `Proposal`, which is written in the
    /// same atomic write and notified first, and rejects the proposal's other option.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::NotFound`] if `unit` is not pending. In particular, accepting the same unit
    ///   twice fails.
    /// - [`ManagerError::IllegalDecision`] if `unit` is a `Proposal`.
    /// - [`ManagerError::OutOfOrderAccept`] if `unit` (or, for options, its proposal) does not extend
    ///   the last accepted unit, or if some edge of a vertex is not accepted yet.
    /// - [`ManagerError::StorageFailure`] if the write failed. The chain halts.
    /// - [`ManagerError::ListenerFailures`] if the unit was accepted, but some listeners failed.
    pub fn accept(&mut self, unit: &UnitID) -> Result<(), ManagerError> {
        self.ensure_running()?;

        let pending = self
            .pending
            .get(unit)
            .ok_or(ManagerError::NotFound { unit: *unit })?;
        let option = match &pending.execution {
            Execution::Proposal(_) => {
                return Err(ManagerError::IllegalDecision {
                    unit: *unit,
                    reason: "a Proposal is accepted through its Commit or Abort child",
                })
            }
            Execution::Diff(_) => None,
            Execution::Option(option) => Some(*option),
        };

        match option {
            None => self.accept_unit(unit),
            Some(option) => self.accept_option(unit, option),
        }
    }

    /// Reject the pending unit `unit`, together with all of its pending descendants.
    ///
    /// Rejecting never touches durable storage. Rejecting a unit that has already been rejected,
    /// including one that the manager rejected automatically, succeeds without doing anything
    /// except acknowledging the rejection (see [`awaiting_rejection`](Self::awaiting_rejection)).
    ///
    /// # Errors
    ///
    /// - [`ManagerError::NotFound`] if `unit` is neither pending nor recently rejected.
    /// - [`ManagerError::IllegalDecision`] if `unit` is a pending `Proposal`. A proposal is only
    ///   ever rejected as a descendant of a rejected unit, or when a sibling of it is accepted.
    pub fn reject(&mut self, unit: &UnitID) -> Result<(), ManagerError> {
        self.ensure_running()?;

        if let Some(rejected) = self.rejected.get_mut(unit) {
            rejected.awaiting_driver = false;
            log::debug!("unit {} was already rejected", unit);
            return Ok(());
        }

        let pending = self
            .pending
            .get(unit)
            .ok_or(ManagerError::NotFound { unit: *unit })?;
        if let Execution::Proposal(_) = pending.execution {
            return Err(ManagerError::IllegalDecision {
                unit: *unit,
                reason: "a Proposal is rejected only together with its parent",
            });
        }

        self.discard_branch(unit, false);
        Ok(())
    }

    /// Get the units that the manager rejected on its own, and that the consensus driver has not
    /// rejected yet, lowest first.
    pub fn awaiting_rejection(&self) -> Vec<UnitID> {
        let mut awaiting: Vec<&RejectedUnit> = self
            .rejected
            .values()
            .filter(|rejected| rejected.awaiting_driver)
            .collect();
        awaiting.sort_by_key(|rejected| (rejected.unit.height(), rejected.unit.id()));
        awaiting.iter().map(|rejected| rejected.unit.id()).collect()
    }

    /// Get the ID of the last accepted unit.
    pub fn last_accepted(&self) -> UnitID {
        self.last_accepted.id()
    }

    pub fn last_accepted_height(&self) -> UnitHeight {
        self.last_accepted.height()
    }

    /// Get the option of the pending proposal `proposal` that this node initially prefers.
    pub fn preferred_option(&self, proposal: &UnitID) -> Result<ProposalOption, ManagerError> {
        match self.pending.get(proposal).map(|pending| &pending.execution) {
            Some(Execution::Proposal(diffs)) => Ok(diffs.initial_preference()),
            Some(_) => Err(ManagerError::NotAProposal { unit: *proposal }),
            None => Err(ManagerError::NotFound { unit: *proposal }),
        }
    }
}

/// State getters.
impl<K: KVStore> Manager<K> {
    /// Read `key` as it is after `unit` is executed. `unit` must be pending or the last accepted
    /// unit.
    pub fn read(&self, unit: &UnitID, key: &[u8]) -> Result<Option<StateValue>, ManagerError> {
        match self.state(unit) {
            Some(VersionedState::Pending(diff)) => Ok(diff.get(key, self)?),
            Some(VersionedState::Accepted) => Ok(self.durable.accepted_state(key)),
            None => Err(ManagerError::NotFound { unit: *unit }),
        }
    }

    /// Read `key` from the accepted state.
    pub fn accepted_state(&self, key: &[u8]) -> Option<StateValue> {
        self.durable.accepted_state(key)
    }

    /// Read `key` from the shared memory of `chain`.
    pub fn shared_memory(&self, chain: ChainID, key: &[u8]) -> Option<Vec<u8>> {
        self.durable.shared_memory(chain, key)
    }

    /// Get the accepted unit at `height`.
    pub fn unit_at_height(&self, height: UnitHeight) -> Result<Option<UnitID>, ManagerError> {
        Ok(self.durable.unit_at_height(height)?)
    }

    pub fn is_pending(&self, unit: &UnitID) -> bool {
        self.pending.contains_key(unit)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get the pending children of `unit`.
    pub fn children(&self, unit: &UnitID) -> Vec<UnitID> {
        self.children
            .get(unit)
            .map(|children| children.vec().clone())
            .unwrap_or_default()
    }
}

/// Helpers.
impl<K: KVStore> Manager<K> {
    fn ensure_running(&self) -> Result<(), ManagerError> {
        match &self.halted {
            Some(reason) => Err(ManagerError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn is_accepted(&self, unit: &UnitID) -> bool {
        self.cached_accepted(unit).is_some() || self.durable.contains_unit(unit)
    }

    fn cached_accepted(&self, unit: &UnitID) -> Option<&Unit> {
        self.accepted_cache.iter().rev().find(|accepted| accepted.id() == *unit)
    }

    fn resolve_parent(&self, unit: &Unit) -> Result<Unit, ManagerError> {
        let parent = unit.parent();
        if let Some(pending) = self.pending.get(&parent) {
            Ok(pending.unit.clone())
        } else if parent == self.last_accepted.id() {
            Ok(self.last_accepted.clone())
        } else if self.is_accepted(&parent) {
            Err(ManagerError::InvalidParent {
                parent,
                reason: "parent is accepted but is not the last accepted unit",
            })
        } else if self.rejected.contains_key(&parent) {
            Err(ManagerError::InvalidParent {
                parent,
                reason: "parent was rejected",
            })
        } else {
            Err(ManagerError::UnknownParent { parent })
        }
    }

    /// Get the height of `unit` if it is pending or accepted.
    pub(crate) fn known_height(&self, unit: &UnitID) -> Result<Option<UnitHeight>, ManagerError> {
        if let Some(pending) = self.pending.get(unit) {
            return Ok(Some(pending.unit.height()));
        }
        if let Some(accepted) = self.cached_accepted(unit) {
            return Ok(Some(accepted.height()));
        }
        Ok(self.durable.unit(unit)?.map(|accepted| accepted.height()))
    }

    /// Get the pending child of `proposal` that decides `option`, if there is one.
    pub(crate) fn option_of(&self, proposal: &UnitID, option: ProposalOption) -> Option<UnitID> {
        self.children.get(proposal)?.iter().copied().find(|child| {
            matches!(
                self.pending.get(child).map(|pending| &pending.execution),
                Some(Execution::Option(child_option)) if *child_option == option
            )
        })
    }

    fn accept_unit(&mut self, unit: &UnitID) -> Result<(), ManagerError> {
        let pending = self
            .pending
            .get(unit)
            .ok_or(ManagerError::NotFound { unit: *unit })?;
        if pending.unit.parent() != self.last_accepted.id()
            || edges(&pending.unit)
                .iter()
                .any(|edge| !self.is_accepted(edge))
        {
            return Err(ManagerError::OutOfOrderAccept {
                unit: *unit,
                last_accepted: self.last_accepted.id(),
            });
        }

        let mut wb = DurableWriteBatch::new();
        wb.set_accepted(&pending.unit)?;
        if let Execution::Diff(diff) = &pending.execution {
            diff.apply(&mut wb);
        }
        self.commit(wb)?;

        let accepted = self.settle_accepted(unit)?;
        self.notify(&[accepted])
    }

    fn accept_option(&mut self, unit: &UnitID, option: ProposalOption) -> Result<(), ManagerError> {
        let option_unit = self
            .pending
            .get(unit)
            .map(|pending| pending.unit.clone())
            .ok_or(ManagerError::NotFound { unit: *unit })?;
        let proposal_id = option_unit.parent();
        let proposal = self
            .pending
            .get(&proposal_id)
            .ok_or(ManagerError::NotFound { unit: proposal_id })?;
        let diffs = match &proposal.execution {
            Execution::Proposal(diffs) => diffs,
            _ => {
                return Err(ManagerError::InvalidParent {
                    parent: proposal_id,
                    reason: "Commit and Abort units must extend a Proposal",
                })
            }
        };
        if proposal.unit.parent() != self.last_accepted.id() {
            return Err(ManagerError::OutOfOrderAccept {
                unit: proposal_id,
                last_accepted: self.last_accepted.id(),
            });
        }

        let mut wb = DurableWriteBatch::new();
        wb.set_unit(&proposal.unit);
        wb.set_unit_at_height(proposal.unit.height(), &proposal_id)?;
        wb.set_accepted(&option_unit)?;
        diffs.branch(option).apply(&mut wb);
        self.commit(wb)?;

        if let Some(sibling) = self.option_of(&proposal_id, option.sibling()) {
            self.discard_branch(&sibling, true);
        }
        let proposal = self.settle_accepted(&proposal_id)?;
        let option_unit = self.settle_accepted(unit)?;
        self.notify(&[proposal, option_unit])
    }

    fn commit(&mut self, wb: DurableWriteBatch<K::WriteBatch>) -> Result<(), ManagerError> {
        match self.durable.write(wb) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.halt(format!("failed to commit accepted unit: {}", err));
                Err(ManagerError::StorageFailure(err.to_string()))
            }
        }
    }

    // Move a unit whose accept was just committed out of the pending tree, and reject the branches
    // of its siblings.
    fn settle_accepted(&mut self, unit: &UnitID) -> Result<Unit, ManagerError> {
        let pending = self
            .pending
            .remove(unit)
            .ok_or(ManagerError::NotFound { unit: *unit })?;
        let consumed = pending.consumed();
        let accepted = pending.unit;

        for key in consumed {
            self.release(&key, unit);
        }
        self.referenced_by.remove(unit);

        let previous = self.last_accepted.id();
        let siblings = self.children.remove(&previous).unwrap_or_default();
        for sibling in siblings.iter().filter(|sibling| *sibling != unit) {
            self.discard_branch(sibling, true);
        }
        self.children.entry(*unit).or_default();
        self.last_accepted = accepted.clone();

        self.accepted_cache.push_back(accepted.clone());
        let window = self.config.accepted_cache_window;
        let newest = accepted.height();
        while self
            .accepted_cache
            .front()
            .map_or(false, |oldest| newest - oldest.height() > window)
        {
            self.accepted_cache.pop_front();
        }
        self.rejected
            .retain(|_, rejected| newest - rejected.unit.height() <= window);

        Event::publish(
            &self.event_publisher,
            Event::AcceptUnit(AcceptUnitEvent {
                timestamp: SystemTime::now(),
                chain: self.config.chain_id,
                unit: *unit,
                height: accepted.height(),
                kind: accepted.kind(),
            }),
        );

        Ok(accepted)
    }

    fn notify(&mut self, accepted: &[Unit]) -> Result<(), ManagerError> {
        let ctx = AcceptContext::new(self.config.chain_id);
        let mut notify_error: Option<NotifyError> = None;
        for unit in accepted {
            if let Err(err) = self.acceptors.notify(&ctx, unit) {
                match notify_error.as_mut() {
                    Some(existing) => existing.absorb(err),
                    None => notify_error = Some(err),
                }
            }
        }

        match notify_error {
            None => Ok(()),
            Some(err) => {
                if err.is_fatal(self.config.critical_failure_threshold) {
                    self.halt(format!("a listener requiring a complete index failed: {}", err));
                }
                Err(ManagerError::ListenerFailures(err))
            }
        }
    }

    // Remove `root` and all of its pending descendants, including vertices that reference any of
    // them through an edge.
    fn discard_branch(&mut self, root: &UnitID, automatic: bool) {
        for unit in self.units_in_branch(root) {
            let Some(pending) = self.pending.remove(&unit) else {
                continue;
            };
            for key in pending.consumed() {
                self.release(&key, &unit);
            }
            self.children.remove(&unit);
            self.referenced_by.remove(&unit);
            if let Some(siblings) = self.children.get_mut(&pending.unit.parent()) {
                siblings.remove(&unit);
            }

            Event::publish(
                &self.event_publisher,
                Event::RejectUnit(RejectUnitEvent {
                    timestamp: SystemTime::now(),
                    chain: self.config.chain_id,
                    unit,
                    height: pending.unit.height(),
                }),
            );
            self.rejected.insert(
                unit,
                RejectedUnit {
                    unit: pending.unit,
                    awaiting_driver: automatic || unit != *root,
                },
            );
        }
    }

    // Depth-first traversal of the pending units that depend on `root`, including `root`.
    fn units_in_branch(&self, root: &UnitID) -> Vec<UnitID> {
        let mut stack = vec![*root];
        let mut visited = HashSet::new();
        let mut branch = Vec::new();
        while let Some(unit) = stack.pop() {
            if !visited.insert(unit) {
                continue;
            }
            for dependents in [self.children.get(&unit), self.referenced_by.get(&unit)]
                .into_iter()
                .flatten()
            {
                stack.extend(dependents.iter().copied());
            }
            branch.push(unit);
        }
        branch
    }

    fn release(&mut self, key: &StateKey, holder: &UnitID) {
        if self.consumed_by.get(key) == Some(holder) {
            self.consumed_by.remove(key);
        }
    }

    fn halt(&mut self, reason: String) {
        if self.halted.is_some() {
            return;
        }
        log::error!("chain {} halted: {}", self.config.chain_id, reason);
        Event::publish(
            &self.event_publisher,
            Event::HaltChain(HaltChainEvent {
                timestamp: SystemTime::now(),
                chain: self.config.chain_id,
                reason: reason.clone(),
            }),
        );
        if let Some(on_fatal) = &self.on_fatal {
            on_fatal(self.config.chain_id, &reason);
        }
        self.halted = Some(reason);
    }
}

// The edges of `unit`, if it is a vertex.
fn edges(unit: &Unit) -> &[UnitID] {
    match unit.body() {
        UnitBody::Vertex { edges, .. } => edges.as_slice(),
        _ => &[],
    }
}

impl<K: KVStore> Versions for Manager<K> {
    fn state(&self, unit: &UnitID) -> Option<VersionedState<'_>> {
        if let Some(pending) = self.pending.get(unit) {
            return match &pending.execution {
                Execution::Diff(diff) => Some(VersionedState::Pending(diff)),
                // A proposal changes nothing until one of its options is accepted.
                Execution::Proposal(diffs) => Some(VersionedState::Pending(diffs.abort_diff())),
                Execution::Option(option) => {
                    match self
                        .pending
                        .get(&pending.unit.parent())
                        .map(|proposal| &proposal.execution)
                    {
                        Some(Execution::Proposal(diffs)) => {
                            Some(VersionedState::Pending(diffs.branch(*option)))
                        }
                        _ => None,
                    }
                }
            };
        }

        if *unit == self.last_accepted.id() {
            Some(VersionedState::Accepted)
        } else {
            None
        }
    }

    fn accepted_state(&self, key: &[u8]) -> Option<StateValue> {
        self.durable.accepted_state(key)
    }
}
