//! Tests for building, parsing, and syntactically verifying units.

use decision_executor::types::{
    data_types::{UnitHeight, UnitID},
    transaction::{ProposalTransaction, Transaction},
    unit::{Unit, UnitBody, UnitError, UnitKind, UnitVisitor, DEFAULT_MAX_UNIT_SIZE},
};

mod common;

use common::units::{
    abort, commit, create, proposal, spend, standard, timestamped_standard, utxo, vertex,
};

#[test]
fn parse_returns_identical_bytes_and_id() {
    let genesis = Unit::genesis();
    let units = vec![
        standard(&genesis, vec![spend(vec![utxo(0)])]),
        timestamped_standard(&genesis, 1_700_000_000, vec![spend(vec![utxo(1)])]),
        proposal(&genesis, spend(vec![utxo(2)]), true),
        vertex(&genesis, Vec::new(), vec![spend(vec![utxo(3)])]),
    ];

    for unit in units {
        let parsed = Unit::parse(unit.bytes(), DEFAULT_MAX_UNIT_SIZE).unwrap();
        assert_eq!(parsed.bytes(), unit.bytes());
        assert_eq!(parsed.id(), unit.id());
        assert_eq!(parsed.kind(), unit.kind());
        assert_eq!(parsed.timestamp(), unit.timestamp());
    }
}

#[test]
fn genesis_is_deterministic() {
    let genesis = Unit::genesis();
    assert_eq!(genesis.id(), Unit::genesis().id());
    assert_eq!(genesis.height(), UnitHeight::genesis());
    assert_eq!(genesis.parent(), UnitID::empty());
    assert_eq!(genesis.timestamp(), None);
    assert_eq!(genesis.kind(), UnitKind::Standard);
}

#[test]
fn parse_rejects_oversized_units() {
    let unit = standard(&Unit::genesis(), vec![spend(vec![utxo(0)])]);
    let result = Unit::parse(unit.bytes(), unit.bytes().len() - 1);
    assert!(matches!(result, Err(UnitError::MalformedPayload(_))));
}

#[test]
fn build_rejects_oversized_units() {
    let result = Unit::build(
        Unit::genesis().id(),
        UnitHeight::new(1),
        None,
        UnitBody::Standard {
            transactions: vec![create(utxo(0), &[0; 128])],
        },
        64,
    );
    assert!(matches!(result, Err(UnitError::MalformedPayload(_))));
}

#[test]
fn parse_rejects_garbage() {
    assert!(Unit::parse(&[0xff; 7], DEFAULT_MAX_UNIT_SIZE).is_err());

    let unit = standard(&Unit::genesis(), vec![spend(vec![utxo(0)])]);
    let mut trailing = unit.bytes().to_vec();
    trailing.push(0);
    assert!(matches!(
        Unit::parse(&trailing, DEFAULT_MAX_UNIT_SIZE),
        Err(UnitError::MalformedPayload(_))
    ));
}

#[test]
fn standard_units_need_transactions() {
    let unit = standard(&Unit::genesis(), Vec::new());
    assert!(unit.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());
}

#[test]
fn transactions_must_be_well_formed() {
    let genesis = Unit::genesis();

    let double_input = standard(
        &genesis,
        vec![Transaction::new(vec![utxo(0), utxo(0)], Vec::new())],
    );
    assert!(double_input.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());

    let no_effect = standard(&genesis, vec![Transaction::new(Vec::new(), Vec::new())]);
    assert!(no_effect.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());

    let recreates_input = standard(
        &genesis,
        vec![Transaction::new(vec![utxo(0)], vec![(utxo(0), b"again".to_vec())])],
    );
    assert!(recreates_input.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());

    let bad_proposal = proposal(&genesis, Transaction::new(Vec::new(), Vec::new()), true);
    assert!(bad_proposal.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());
}

#[test]
fn vertex_edges_are_checked() {
    let genesis = Unit::genesis();
    let a = vertex(&genesis, Vec::new(), vec![spend(vec![utxo(0)])]);
    let b = vertex(&genesis, Vec::new(), vec![spend(vec![utxo(1)])]);

    let parent_as_edge = vertex(&a, vec![a.id()], vec![spend(vec![utxo(2)])]);
    assert!(parent_as_edge.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());

    let duplicate_edge = vertex(&a, vec![b.id(), b.id()], vec![spend(vec![utxo(2)])]);
    assert!(duplicate_edge.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_err());

    let ok = vertex(&a, vec![b.id()], vec![spend(vec![utxo(2)])]);
    assert!(ok.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_ok());
}

#[test]
fn options_carry_no_payload() {
    let p = proposal(&Unit::genesis(), spend(vec![utxo(0)]), false);
    let c = commit(&p);
    let a = abort(&p);

    assert!(c.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_ok());
    assert!(a.verify_syntax(DEFAULT_MAX_UNIT_SIZE).is_ok());
    assert_ne!(c.id(), a.id());
    assert!(c.kind().is_option() && a.kind().is_option());
    assert!(!p.kind().is_option());
}

// Counts how often each handler was invoked.
#[derive(Default)]
struct CountingVisitor {
    standard: usize,
    proposal: usize,
    options: usize,
    vertex_edges: usize,
}

impl UnitVisitor for CountingVisitor {
    type Output = ();

    fn visit_standard(&mut self, _: &Unit, _: &[Transaction]) {
        self.standard += 1;
    }

    fn visit_proposal(&mut self, _: &Unit, transaction: &ProposalTransaction) {
        assert!(transaction.prefer_commit);
        self.proposal += 1;
    }

    fn visit_commit(&mut self, _: &Unit) {
        self.options += 1;
    }

    fn visit_abort(&mut self, _: &Unit) {
        self.options += 1;
    }

    fn visit_vertex(&mut self, _: &Unit, edges: &[UnitID], _: &[Transaction]) {
        self.vertex_edges += edges.len();
    }
}

#[test]
fn visit_dispatches_to_exactly_one_handler() {
    let genesis = Unit::genesis();
    let p = proposal(&genesis, spend(vec![utxo(0)]), true);
    let s = standard(&genesis, vec![spend(vec![utxo(1)])]);
    let v = vertex(&s, vec![genesis.id()], vec![spend(vec![utxo(2)])]);

    let mut visitor = CountingVisitor::default();
    for unit in [&genesis, &s, &p, &commit(&p), &abort(&p), &v] {
        unit.visit(&mut visitor);
    }

    assert_eq!(visitor.standard, 2);
    assert_eq!(visitor.proposal, 1);
    assert_eq!(visitor.options, 2);
    assert_eq!(visitor.vertex_edges, 1);
}
