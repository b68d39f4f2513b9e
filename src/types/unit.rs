/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the decision unit type and its associated methods.
//!
//! A decision unit is either a block of a linear chain or a vertex of a DAG. Every unit has a
//! header (`parent`, `height`, and optionally `timestamp`) and a [body](UnitBody) whose variant
//! determines how the unit is executed and decided.
//!
//! ## Formats
//!
//! Units exist in two formats, distinguished by whether the header carries a timestamp:
//! 1. The legacy format, whose units have no timestamp of their own.
//! 2. The timestamped format, whose units carry the wall-clock time they were built at.
//!
//! Both formats are serialized with Borsh, and a unit's [`UnitID`] is the SHA-256 hash of its
//! serialization.
//!
//! ## Dispatch
//!
//! Code that needs variant-specific behavior implements [`UnitVisitor`] and calls
//! [`Unit::visit`]. Adding a variant to [`UnitBody`] therefore fails to compile until every visitor
//! handles it.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::{Timestamp, UnitHeight, UnitID},
    transaction::{ProposalTransaction, Transaction},
};

/// Default upper bound on the size of a serialized unit, in bytes.
pub const DEFAULT_MAX_UNIT_SIZE: usize = 2 * 1024 * 1024;

/// Variant-specific payload of a unit.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum UnitBody {
    /// Linear-chain unit whose transactions take effect when it is accepted.
    Standard { transactions: Vec<Transaction> },

    /// Linear-chain unit whose transaction takes effect only if its `Commit` child is accepted.
    Proposal { transaction: ProposalTransaction },

    /// Child of a `Proposal` that applies the proposal's effect when accepted.
    Commit,

    /// Child of a `Proposal` that discards the proposal's effect when accepted.
    Abort,

    /// DAG unit. Besides `parent`, a vertex may reference any number of other units through
    /// `edges`.
    Vertex {
        edges: Vec<UnitID>,
        transactions: Vec<Transaction>,
    },
}

/// The serialized fields of a unit.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct UnitContents {
    parent: UnitID,
    height: UnitHeight,
    timestamp: Option<Timestamp>,
    body: UnitBody,
}

/// An immutable, content-addressed decision unit.
///
/// Two units are equal if and only if they have the same [`id`](Self::id).
#[derive(Clone, Debug)]
pub struct Unit {
    contents: UnitContents,
    id: UnitID,
    bytes: Vec<u8>,
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Unit {}

impl Unit {
    /// Build a unit that extends `parent`.
    ///
    /// Whether `height` is really one greater than the parent's height is not checked here, since
    /// the parent may not be known yet. That check happens during
    /// [verification](crate::manager::Manager::verify).
    ///
    /// # Errors
    ///
    /// Returns [`UnitError::MalformedPayload`] if the serialized unit is larger than `max_size`.
    pub fn build(
        parent: UnitID,
        height: UnitHeight,
        timestamp: Option<Timestamp>,
        body: UnitBody,
        max_size: usize,
    ) -> Result<Unit, UnitError> {
        let contents = UnitContents {
            parent,
            height,
            timestamp,
            body,
        };
        let bytes = contents
            .try_to_vec()
            .map_err(|err| UnitError::MalformedPayload(err.to_string()))?;
        if bytes.len() > max_size {
            return Err(UnitError::MalformedPayload(format!(
                "unit is {} bytes, the maximum is {}",
                bytes.len(),
                max_size
            )));
        }

        Ok(Unit {
            id: Unit::hash(&bytes),
            contents,
            bytes,
        })
    }

    /// Create the genesis unit of a chain: a legacy-format `Standard` unit with no transactions at
    /// height 0, whose parent is [`UnitID::empty`].
    ///
    /// The genesis unit is never verified; it is written directly into durable storage by
    /// [`DurableState::initialize`](crate::storage::durable::DurableState::initialize).
    pub fn genesis() -> Unit {
        let contents = UnitContents {
            parent: UnitID::empty(),
            height: UnitHeight::genesis(),
            timestamp: None,
            body: UnitBody::Standard {
                transactions: Vec::new(),
            },
        };
        // Serializing an empty body into a `Vec` cannot fail.
        let bytes = contents.try_to_vec().unwrap_or_default();
        Unit {
            id: Unit::hash(&bytes),
            contents,
            bytes,
        }
    }

    /// Deserialize a unit from `bytes`.
    ///
    /// Serializing the returned unit with [`bytes`](Self::bytes) yields exactly `bytes`, so the unit's
    /// ID is stable across a round trip through the network or durable storage.
    pub fn parse(bytes: &[u8], max_size: usize) -> Result<Unit, UnitError> {
        if bytes.len() > max_size {
            return Err(UnitError::MalformedPayload(format!(
                "unit is {} bytes, the maximum is {}",
                bytes.len(),
                max_size
            )));
        }
        let contents = UnitContents::try_from_slice(bytes)
            .map_err(|err| UnitError::MalformedPayload(err.to_string()))?;

        // Reject encodings that would not survive a round trip, since they would give the same unit
        // two IDs.
        let canonical = contents
            .try_to_vec()
            .map_err(|err| UnitError::MalformedPayload(err.to_string()))?;
        if canonical != bytes {
            return Err(UnitError::MalformedPayload(String::from(
                "non-canonical unit encoding",
            )));
        }

        Ok(Unit {
            id: Unit::hash(bytes),
            contents,
            bytes: canonical,
        })
    }

    /// Compute the ID of the unit whose serialization is `bytes`.
    pub fn hash(bytes: &[u8]) -> UnitID {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        UnitID::new(hasher.finalize().into())
    }

    pub fn id(&self) -> UnitID {
        self.id
    }

    pub fn parent(&self) -> UnitID {
        self.contents.parent
    }

    pub fn height(&self) -> UnitHeight {
        self.contents.height
    }

    /// The unit's own timestamp. Always `None` for legacy-format units.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.contents.timestamp
    }

    pub fn body(&self) -> &UnitBody {
        &self.contents.body
    }

    /// The unit's serialization. Byte-identical to the input of [`parse`](Self::parse).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check that the unit is well-formed without consulting any state.
    ///
    /// The checks are:
    /// 1. The serialization is no larger than `max_size`.
    /// 2. A `Standard` unit has at least one transaction.
    /// 3. Every transaction is [syntactically valid](Transaction::verify_syntax).
    /// 4. A `Vertex` does not list its own parent as an edge, and lists no edge twice.
    ///
    /// `Commit` and `Abort` units carry nothing but their header, which their type already
    /// guarantees.
    pub fn verify_syntax(&self, max_size: usize) -> Result<(), UnitError> {
        if self.bytes.len() > max_size {
            return Err(UnitError::MalformedPayload(format!(
                "unit is {} bytes, the maximum is {}",
                self.bytes.len(),
                max_size
            )));
        }
        self.visit(&mut SyntaxVerifier)
    }

    /// Dispatch to exactly one of `visitor`'s variant handlers.
    pub fn visit<V: UnitVisitor>(&self, visitor: &mut V) -> V::Output {
        match &self.contents.body {
            UnitBody::Standard { transactions } => visitor.visit_standard(self, transactions),
            UnitBody::Proposal { transaction } => visitor.visit_proposal(self, transaction),
            UnitBody::Commit => visitor.visit_commit(self),
            UnitBody::Abort => visitor.visit_abort(self),
            UnitBody::Vertex {
                edges,
                transactions,
            } => visitor.visit_vertex(self, edges, transactions),
        }
    }

    /// Get the kind of this unit, for logging and for reporting to users.
    pub fn kind(&self) -> UnitKind {
        self.visit(&mut KindVisitor)
    }
}

/// Variant-specific handlers invoked by [`Unit::visit`].
pub trait UnitVisitor {
    type Output;

    fn visit_standard(&mut self, unit: &Unit, transactions: &[Transaction]) -> Self::Output;

    fn visit_proposal(&mut self, unit: &Unit, transaction: &ProposalTransaction) -> Self::Output;

    fn visit_commit(&mut self, unit: &Unit) -> Self::Output;

    fn visit_abort(&mut self, unit: &Unit) -> Self::Output;

    fn visit_vertex(
        &mut self,
        unit: &Unit,
        edges: &[UnitID],
        transactions: &[Transaction],
    ) -> Self::Output;
}

/// The variant of a unit, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Standard,
    Proposal,
    Commit,
    Abort,
    Vertex,
}

impl UnitKind {
    /// Whether this is one of the two options (`Commit` or `Abort`) of a proposal.
    pub fn is_option(&self) -> bool {
        matches!(self, UnitKind::Commit | UnitKind::Abort)
    }

    /// Name of the kind in PascalCase.
    pub fn name(&self) -> &'static str {
        match self {
            UnitKind::Standard => "Standard",
            UnitKind::Proposal => "Proposal",
            UnitKind::Commit => "Commit",
            UnitKind::Abort => "Abort",
            UnitKind::Vertex => "Vertex",
        }
    }
}

struct KindVisitor;

impl UnitVisitor for KindVisitor {
    type Output = UnitKind;

    fn visit_standard(&mut self, _: &Unit, _: &[Transaction]) -> UnitKind {
        UnitKind::Standard
    }

    fn visit_proposal(&mut self, _: &Unit, _: &ProposalTransaction) -> UnitKind {
        UnitKind::Proposal
    }

    fn visit_commit(&mut self, _: &Unit) -> UnitKind {
        UnitKind::Commit
    }

    fn visit_abort(&mut self, _: &Unit) -> UnitKind {
        UnitKind::Abort
    }

    fn visit_vertex(&mut self, _: &Unit, _: &[UnitID], _: &[Transaction]) -> UnitKind {
        UnitKind::Vertex
    }
}

struct SyntaxVerifier;

impl SyntaxVerifier {
    fn verify_transactions(transactions: &[Transaction]) -> Result<(), UnitError> {
        transactions
            .iter()
            .try_for_each(|tx| tx.verify_syntax().map_err(UnitError::MalformedPayload))
    }
}

impl UnitVisitor for SyntaxVerifier {
    type Output = Result<(), UnitError>;

    fn visit_standard(&mut self, _: &Unit, transactions: &[Transaction]) -> Self::Output {
        if transactions.is_empty() {
            return Err(UnitError::MalformedPayload(String::from(
                "standard unit has no transactions",
            )));
        }
        Self::verify_transactions(transactions)
    }

    fn visit_proposal(&mut self, _: &Unit, transaction: &ProposalTransaction) -> Self::Output {
        transaction
            .effect
            .verify_syntax()
            .map_err(UnitError::MalformedPayload)
    }

    fn visit_commit(&mut self, _: &Unit) -> Self::Output {
        Ok(())
    }

    fn visit_abort(&mut self, _: &Unit) -> Self::Output {
        Ok(())
    }

    fn visit_vertex(
        &mut self,
        unit: &Unit,
        edges: &[UnitID],
        transactions: &[Transaction],
    ) -> Self::Output {
        let mut seen = std::collections::BTreeSet::new();
        for edge in edges {
            if *edge == unit.parent() {
                return Err(UnitError::MalformedPayload(String::from(
                    "vertex lists its parent as an edge",
                )));
            }
            if !seen.insert(edge) {
                return Err(UnitError::MalformedPayload(String::from(
                    "vertex lists the same edge twice",
                )));
            }
        }
        Self::verify_transactions(transactions)
    }
}

/// Errors that may arise when building, parsing, or syntactically verifying a unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
