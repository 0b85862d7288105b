//! Compaction merges SSTables into the next level, dropping shadowed
//! entries (and tombstones once they reach the bottommost level).
//!
//! Only the mechanism lives here; deciding *when* to compact and which
//! tables to pick is up to the caller.

mod worker;

pub use worker::{do_compaction, Options};
