/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that dispatches published [events](crate::events) to their handlers.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking for a shutdown signal again.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct EventHandlers {
    pub(crate) verify_unit_handlers: Vec<HandlerPtr<VerifyUnitEvent>>,
    pub(crate) accept_unit_handlers: Vec<HandlerPtr<AcceptUnitEvent>>,
    pub(crate) reject_unit_handlers: Vec<HandlerPtr<RejectUnitEvent>>,
    pub(crate) halt_chain_handlers: Vec<HandlerPtr<HaltChainEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers, adding the default loggers in front of them if `log_events` is
    /// set.
    pub(crate) fn new(
        log_events: bool,
        on_verify_unit: Option<HandlerPtr<VerifyUnitEvent>>,
        on_accept_unit: Option<HandlerPtr<AcceptUnitEvent>>,
        on_reject_unit: Option<HandlerPtr<RejectUnitEvent>>,
        on_halt_chain: Option<HandlerPtr<HaltChainEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, user: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(user);
            handlers
        }

        EventHandlers {
            verify_unit_handlers: handlers(log_events, on_verify_unit),
            accept_unit_handlers: handlers(log_events, on_accept_unit),
            reject_unit_handlers: handlers(log_events, on_reject_unit),
            halt_chain_handlers: handlers(log_events, on_halt_chain),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.verify_unit_handlers.is_empty()
            && self.accept_unit_handlers.is_empty()
            && self.reject_unit_handlers.is_empty()
            && self.halt_chain_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::VerifyUnit(verify_unit_event) => self
                .verify_unit_handlers
                .iter()
                .for_each(|handler| handler(&verify_unit_event)),

            Event::AcceptUnit(accept_unit_event) => self
                .accept_unit_handlers
                .iter()
                .for_each(|handler| handler(&accept_unit_event)),

            Event::RejectUnit(reject_unit_event) => self
                .reject_unit_handlers
                .iter()
                .for_each(|handler| handler(&reject_unit_event)),

            Event::HaltChain(halt_chain_event) => self
                .halt_chain_handlers
                .iter()
                .for_each(|handler| handler(&halt_chain_event)),
        }
    }
}

/// Start the event bus thread.
///
/// The thread runs until it receives a shutdown signal, or until every publisher is dropped. Events
/// already published when the signal arrives are still dispatched before the thread exits.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                event_subscriber
                    .try_iter()
                    .for_each(|event| event_handlers.fire_handlers(event));
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
