//! Listeners that record what they are notified of.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use decision_executor::{
    acceptor::{AcceptContext, Acceptor, AcceptorError},
    types::{
        data_types::{ChainID, UnitID},
        unit::Unit,
    },
};

/// Records the ID of every unit it accepts. Can be made to fail.
pub(crate) struct RecordingAcceptor {
    received: Mutex<Vec<(ChainID, UnitID)>>,
    failing: AtomicBool,
    critical: bool,
    deregistered: AtomicBool,
}

impl RecordingAcceptor {
    pub(crate) fn new() -> RecordingAcceptor {
        RecordingAcceptor {
            received: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            critical: false,
            deregistered: AtomicBool::new(false),
        }
    }

    /// A listener whose failures count towards halting its chain.
    pub(crate) fn critical() -> RecordingAcceptor {
        RecordingAcceptor {
            critical: true,
            ..RecordingAcceptor::new()
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// IDs of the units successfully accepted so far, in order.
    pub(crate) fn received(&self) -> Vec<UnitID> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, unit)| *unit)
            .collect()
    }

    pub(crate) fn received_chains(&self) -> Vec<ChainID> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(chain, _)| *chain)
            .collect()
    }

    pub(crate) fn was_deregistered(&self) -> bool {
        self.deregistered.load(Ordering::SeqCst)
    }
}

impl Acceptor for RecordingAcceptor {
    fn accept(&self, ctx: &AcceptContext, unit: &Unit) -> Result<(), AcceptorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AcceptorError::Failed(String::from("induced failure")));
        }
        self.received.lock().unwrap().push((ctx.chain_id, unit.id()));
        Ok(())
    }

    fn on_deregister(&self) -> Result<(), AcceptorError> {
        self.deregistered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn requires_complete_index(&self) -> bool {
        self.critical
    }
}
