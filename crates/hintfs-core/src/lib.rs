#![warn(missing_docs)]

//! hintfs core: existence hint cache and I/O load throttling.
//!
//! An IDE-style virtual-filesystem layer calls `stat` constantly: every node
//! refresh, every save, every background scan. This crate caches short-lived
//! hints about whether a path was just created or deleted, so hot-path
//! existence checks can skip the real syscall, and it meters I/O call volume
//! so bulk background scans can voluntarily yield to interactive operations.
//!
//! All state is advisory and in-memory. The cache may be cleared at any
//! moment; callers always get a correct answer by falling through to the
//! real probe.

pub mod attrs;
pub mod error;
pub mod hints;
pub mod ident;
pub mod probe;
pub mod throttle;
pub mod vfs;

pub use error::{HintError, Result};
