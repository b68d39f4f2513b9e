/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two branch diffs of a `Proposal` unit.
//!
//! A proposal does not change state by itself. Its transaction only takes effect if its `Commit`
//! child is accepted, so executing a proposal produces two diffs, both on top of the proposal's
//! parent:
//! - `on_commit`, which holds the effect of the proposal's transaction, and
//! - `on_abort`, which is empty.
//!
//! The `Commit` and `Abort` children read through the corresponding branch, and exactly one of the
//! branches is ever applied to durable storage.

use crate::types::{
    data_types::{Timestamp, UnitID},
    transaction::ProposalTransaction,
};

use super::{Diff, DiffError, Versions};

/// One of the two outcomes of a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProposalOption {
    Commit,
    Abort,
}

impl ProposalOption {
    /// Get the other option.
    pub fn sibling(&self) -> ProposalOption {
        match self {
            ProposalOption::Commit => ProposalOption::Abort,
            ProposalOption::Abort => ProposalOption::Commit,
        }
    }
}

/// The executed branches of a proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalDiffs {
    on_commit: Diff,
    on_abort: Diff,
    prefer_commit: bool,
}

impl ProposalDiffs {
    /// Execute `transaction` on top of the state of `parent`, producing both branches.
    pub fn execute<V: Versions + ?Sized>(
        parent: UnitID,
        timestamp: Option<Timestamp>,
        transaction: &ProposalTransaction,
        versions: &V,
    ) -> Result<ProposalDiffs, DiffError> {
        let mut on_commit = Diff::new(parent, timestamp);
        on_commit.execute(&transaction.effect, versions)?;

        Ok(ProposalDiffs {
            on_commit,
            on_abort: Diff::new(parent, timestamp),
            prefer_commit: transaction.prefer_commit,
        })
    }

    /// The option this node prefers before consensus has converged.
    pub fn initial_preference(&self) -> ProposalOption {
        if self.prefer_commit {
            ProposalOption::Commit
        } else {
            ProposalOption::Abort
        }
    }

    pub fn commit_diff(&self) -> &Diff {
        &self.on_commit
    }

    pub fn abort_diff(&self) -> &Diff {
        &self.on_abort
    }

    /// Get the branch that `option` would apply.
    pub fn branch(&self, option: ProposalOption) -> &Diff {
        match option {
            ProposalOption::Commit => &self.on_commit,
            ProposalOption::Abort => &self.on_abort,
        }
    }
}
