//! Error types shared across the stratum crates.

use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Compile-time failures abort plan construction. The constraint and cascade
/// kinds are raised by whatever evaluates a compiled plan; the compiler only
/// builds the assertions that carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// A named object (column, table, key, function) could not be resolved.
    Unresolved,
    /// The input was structurally valid but semantically meaningless.
    Semantic,
    /// Recursion or resource limits were exceeded.
    ResourceExhausted,
    /// A NOT NULL, PRIMARY KEY, UNIQUE, or FOREIGN KEY assertion fired.
    ConstraintViolation,
    /// A recursively compiled dependent mutation failed.
    CascadeFailure,
    /// Cardinality of a scalar expression exceeded one row.
    Cardinality,
    /// Feature isn't implemented.
    NotImplemented,
    /// Catch-all.
    Other,
}

impl DbErrorKind {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "Unresolved",
            Self::Semantic => "Semantic",
            Self::ResourceExhausted => "Resource exhausted",
            Self::ConstraintViolation => "Constraint violation",
            Self::CascadeFailure => "Cascade failure",
            Self::Cardinality => "Cardinality",
            Self::NotImplemented => "Not implemented",
            Self::Other => "Error",
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub struct DbError {
    pub kind: DbErrorKind,
    pub msg: String,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        DbError {
            kind: DbErrorKind::Other,
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_kind(kind: DbErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            kind,
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> DbErrorKind {
        self.kind
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

pub trait ResultExt<T> {
    /// Wrap the error with additional context.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap the error with additional lazily computed context.
    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| DbError::new(msg).with_source(e))
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| DbError::new(f()).with_source(e))
    }
}

pub trait OptionExt<T> {
    /// Convert a `None` into an error with the given message.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        self.ok_or_else(|| DbError::new(msg))
    }
}

#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::DbError::with_kind(
            $crate::DbErrorKind::NotImplemented,
            format!($($arg)*),
        ))
    };
}
