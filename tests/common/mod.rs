#![allow(dead_code)]

pub(crate) mod acceptors;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod units;
