//! Output IR: an append-only DAG of column-at-a-time statements handed to the
//! executor. Statements are created and appended during compilation, never
//! deleted; a statement always precedes its consumers in the sequence.

pub mod ops;

use std::fmt;

use stratum_error::{DbError, Result};

use self::ops::StatementOp;
use crate::arrays::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Whether a statement yields one value or a column of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Scalar,
    Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub op: StatementOp,
    pub datatype: DataType,
    pub card: Cardinality,
    /// Output `(table, column)` naming, set by the renaming pass.
    pub alias: Option<(String, String)>,
    /// Mutations and assertions must never be eliminated or reordered by the
    /// executor, even when the declared result is unused.
    pub side_effect: bool,
}

impl Statement {
    pub fn new(op: StatementOp, datatype: DataType, card: Cardinality) -> Self {
        let side_effect = op.has_side_effect();
        Statement {
            op,
            datatype,
            card,
            alias: None,
            side_effect,
        }
    }
}

/// Append-only arena of statements. Ids are positions in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementGraph {
    stmts: Vec<Statement>,
}

impl StatementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: Statement) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    pub fn get(&self, id: StmtId) -> Result<&Statement> {
        self.stmts
            .get(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("statement out of bounds: {id}")))
    }

    pub fn get_mut(&mut self, id: StmtId) -> Result<&mut Statement> {
        self.stmts
            .get_mut(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("statement out of bounds: {id}")))
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StmtId, &Statement)> {
        self.stmts
            .iter()
            .enumerate()
            .map(|(idx, s)| (StmtId(idx as u32), s))
    }
}

/// A named output column of a compiled plan.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub id: StmtId,
    pub table: String,
    pub name: String,
    pub datatype: DataType,
}

/// Result of compiling one top-level plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub graph: StatementGraph,
    pub outputs: Vec<OutputColumn>,
}
