//! Input plan representation: relational operator trees over typed
//! expressions, produced by an upstream binder/optimizer and read-only to the
//! compiler.

pub mod expr;
pub mod operator;
