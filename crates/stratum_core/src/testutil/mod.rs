//! Test support: an in-memory column store and a reference interpreter for
//! compiled statement graphs. Tests compile a plan tree and execute it here
//! to check end-to-end semantics.

pub mod interp;
pub mod storage;
