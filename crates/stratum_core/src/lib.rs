//! Compilation of optimized relational plans into columnar statement graphs.
//!
//! The input is a typed tree of relational operators produced by an upstream
//! binder/optimizer, plus read-only catalog metadata. The output is a DAG of
//! column-at-a-time statements for a columnar executor. Parsing, optimization
//! and execution itself live elsewhere; the reference interpreter under
//! [`testutil`] exists only to make the compiler's behavior testable.

pub mod arrays;
pub mod catalog;
pub mod explain;
pub mod plan;
pub mod planner;
pub mod statements;
pub mod testutil;
