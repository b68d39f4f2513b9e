/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the executor.
//!
//! Types specific to a single component, for example [`Diff`](crate::diff::Diff), live in that
//! component's module.

pub mod crypto_primitives;

pub mod data_types;

pub mod transaction;

pub mod unit;

pub mod update_sets;
