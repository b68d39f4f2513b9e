/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory records kept by the manager for undecided and recently decided units, and the
//! variant-specific execution that produces them.

use crate::{
    diff::{
        proposal::{ProposalDiffs, ProposalOption},
        Diff,
    },
    storage::pluggables::KVStore,
    types::{
        data_types::{StateKey, UnitID},
        transaction::{ProposalTransaction, Transaction},
        unit::{Unit, UnitKind, UnitVisitor},
    },
};

use super::{errors::ManagerError, Manager};

/// What verifying a unit produced.
pub(crate) enum Execution {
    /// `Standard` and `Vertex` units: the effect of their transactions.
    Diff(Diff),

    /// `Proposal` units: both branches.
    Proposal(ProposalDiffs),

    /// `Commit` and `Abort` units. Their state is the matching branch of their parent proposal.
    Option(ProposalOption),
}

/// A verified, undecided unit.
pub(crate) struct PendingUnit {
    pub(crate) unit: Unit,
    pub(crate) execution: Execution,
}

impl PendingUnit {
    /// Keys consumed by this unit, which no other pending unit may consume.
    pub(crate) fn consumed(&self) -> Vec<StateKey> {
        match &self.execution {
            Execution::Diff(diff) => diff.consumed().cloned().collect(),
            Execution::Proposal(diffs) => diffs.commit_diff().consumed().cloned().collect(),
            Execution::Option(_) => Vec::new(),
        }
    }
}

/// A unit rejected within the retained height window.
pub(crate) struct RejectedUnit {
    pub(crate) unit: Unit,

    /// Whether the manager rejected the unit on its own, so the consensus driver has yet to call
    /// `reject` on it.
    pub(crate) awaiting_driver: bool,
}

/// Executes a unit on top of its parent's state.
pub(crate) struct Executor<'a, K: KVStore> {
    pub(crate) manager: &'a Manager<K>,
    pub(crate) parent: &'a Unit,
}

impl<'a, K: KVStore> Executor<'a, K> {
    fn execute_transactions(
        &self,
        unit: &Unit,
        transactions: &[Transaction],
    ) -> Result<Diff, ManagerError> {
        let mut diff = Diff::new(unit.parent(), unit.timestamp());
        for transaction in transactions {
            diff.execute(transaction, self.manager)?;
        }
        Ok(diff)
    }

    fn ensure_parent_is_not_proposal(&self) -> Result<(), ManagerError> {
        if self.parent.kind() == UnitKind::Proposal {
            Err(ManagerError::InvalidParent {
                parent: self.parent.id(),
                reason: "only Commit and Abort units may extend a Proposal",
            })
        } else {
            Ok(())
        }
    }

    fn verify_option(&self, option: ProposalOption) -> Result<Execution, ManagerError> {
        if self.parent.kind() != UnitKind::Proposal {
            return Err(ManagerError::InvalidParent {
                parent: self.parent.id(),
                reason: "Commit and Abort units must extend a Proposal",
            });
        }
        if self.manager.option_of(&self.parent.id(), option).is_some() {
            return Err(ManagerError::InvalidParent {
                parent: self.parent.id(),
                reason: "the proposal already has a pending unit deciding this option",
            });
        }
        Ok(Execution::Option(option))
    }
}

impl<'a, K: KVStore> UnitVisitor for Executor<'a, K> {
    type Output = Result<Execution, ManagerError>;

    fn visit_standard(&mut self, unit: &Unit, transactions: &[Transaction]) -> Self::Output {
        self.ensure_parent_is_not_proposal()?;
        Ok(Execution::Diff(self.execute_transactions(unit, transactions)?))
    }

    fn visit_proposal(&mut self, unit: &Unit, transaction: &ProposalTransaction) -> Self::Output {
        self.ensure_parent_is_not_proposal()?;
        Ok(Execution::Proposal(ProposalDiffs::execute(
            unit.parent(),
            unit.timestamp(),
            transaction,
            self.manager,
        )?))
    }

    fn visit_commit(&mut self, _: &Unit) -> Self::Output {
        self.verify_option(ProposalOption::Commit)
    }

    fn visit_abort(&mut self, _: &Unit) -> Self::Output {
        self.verify_option(ProposalOption::Abort)
    }

    fn visit_vertex(
        &mut self,
        unit: &Unit,
        edges: &[UnitID],
        transactions: &[Transaction],
    ) -> Self::Output {
        self.ensure_parent_is_not_proposal()?;
        for edge in edges {
            let height = self
                .manager
                .known_height(edge)?
                .ok_or(ManagerError::UnknownParent { parent: *edge })?;
            if height >= unit.height() {
                return Err(ManagerError::InvalidParent {
                    parent: *edge,
                    reason: "edges must point to units of lower height",
                });
            }
        }
        Ok(Execution::Diff(self.execute_transactions(unit, transactions)?))
    }
}
