//! hintfs test & validation infrastructure.
//!
//! Cross-thread scenarios for the load throttle, stress and shrink tests for
//! the hint cache, and property-based tests of the hint merge lattice. The
//! in-module unit tests in `hintfs-core` cover single-thread semantics; this
//! crate covers what only real threads and large inputs can show.

pub mod harness;

pub mod proptest_hints;

pub use harness::{ScriptedDisk, TestEnv};
