//! An embedded, single-node, ordered key-value store, organized as a
//! log-structured merge tree (LSM-tree).
//!
//! ##### About
//!
//! Writes are appended to a write-ahead log (with batched group commit)
//! and buffered in an in-memory write buffer (`MemTable`). Full memtables
//! are rotated out and flushed to immutable, sorted, compressed disk
//! tables (`SSTables`) by a background thread; a manifest file tracks the
//! live tables across restarts.
//!
//! Amassing many tables on disk degrades read performance and wastes disk
//! space, so tables can be merged into deeper levels using [`Engine::compact`].
//! Deciding *when* to do so is left to the caller.
//!
//! # Example usage
//!
//! ```
//! use segment_db::Config;
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let db = Config::new(folder).open()?;
//!
//! // An acknowledged write is durable, even if the process dies
//! db.put("my_key", "my_value")?;
//!
//! let item = db.get("my_key")?;
//! assert_eq!(Some("my_value".as_bytes().into()), item);
//!
//! // Deletion writes a tombstone that masks older values
//! db.delete("my_key")?;
//! assert_eq!(None, db.get("my_key")?);
//!
//! db.close()?;
//! #
//! # Ok::<(), segment_db::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

#[doc(hidden)]
pub mod bloom;

pub mod compaction;
mod config;
mod disk_block;
mod engine;
mod engine_inner;
mod error;

#[doc(hidden)]
pub mod file;

mod flush;
mod manifest;
mod memtable;
mod merge;

#[doc(hidden)]
pub mod segment;

mod seqno;
mod serde;
mod value;
mod version;

#[doc(hidden)]
pub mod wal;

pub use {
    config::Config,
    engine::Engine,
    error::{Error, Result},
    memtable::MemTable,
    seqno::SequenceNumberCounter,
    serde::{DeserializeError, SerializeError},
    value::{SeqNo, UserKey, UserValue, Value, ValueType},
    version::Version,
};
