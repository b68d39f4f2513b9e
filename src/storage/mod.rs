/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable storage of decided units, accepted state, and index data.
//!
//! Library users plug in a key-value store by implementing the traits in [`pluggables`]. The layout
//! of the executor's variables inside that store is documented in [`variables`], and the typed
//! accessors the executor itself uses are in [`durable`].

pub mod durable;

pub mod pluggables;

pub mod variables;
