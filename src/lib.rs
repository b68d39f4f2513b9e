/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Executes the decisions of a consensus engine on a node's durable state.
//!
//! A consensus driver hands the [engine](engine::Engine) of a chain every unit (block or vertex) it
//! learns about, and later tells it whether each unit was accepted or rejected. In between, the
//! chain's [manager](manager::Manager) keeps the unit pending together with a
//! [diff](diff::Diff) of its effect on state, layered over the diffs of its pending ancestors.
//! Accepting a unit commits its diff atomically and notifies the [listeners](acceptor) of the
//! chain, among them the [indexer](indexer)'s per-chain indices.

pub mod acceptor;

pub mod chain;

pub mod diff;

pub mod engine;

pub(crate) mod event_bus;

pub mod events;

pub mod indexer;

pub mod logging;

pub mod manager;

pub mod storage;

pub mod types;
