/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Re-exports of the hashing primitives used to content-address units.

pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;
