use std::fmt;

use stratum_error::{DbError, Result};

use super::expr::{Expression, NamedExpr, OrderKey};

/// Stable identity of a node within a [`PlanTree`] arena. Shared subplans are
/// multiple parents holding the same id; the compiler's subplan cache is
/// keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelId(pub u32);

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match.
    Semi,
    /// Left rows with no match.
    Anti,
    /// All left rows plus a three-valued boolean mark column.
    Mark,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Semi => "SEMI",
            JoinKind::Anti => "ANTI",
            JoinKind::Mark => "MARK",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Union,
    Except,
    Intersect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseTable {
    pub table: String,
    /// Range-variable name; output columns are bound under it when present.
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub input: RelId,
    pub exprs: Vec<NamedExpr>,
    /// Sort keys applied to the projected output, resolved against the
    /// projection first and the input second.
    pub order: Vec<OrderKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub input: RelId,
    pub predicates: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub left: RelId,
    pub right: RelId,
    pub kind: JoinKind,
    pub predicates: Vec<Expression>,
    /// Output name of the mark column for [`JoinKind::Mark`].
    pub mark_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub input: RelId,
    pub keys: Vec<Expression>,
    /// Aggregates plus grouping-key references, in output order.
    pub outputs: Vec<NamedExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopN {
    pub input: RelId,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input: RelId,
    pub size: Expression,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub left: RelId,
    pub right: RelId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    /// Source relation; columns align positionally with the table's columns.
    pub input: RelId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    /// First output column must be the target row ids (the `%TID%` column of
    /// the base table); the rest align positionally with `columns`.
    pub input: RelId,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    /// First output column must be the target row ids; `None` deletes all.
    pub input: Option<RelId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Truncate {
    pub table: String,
    pub cascade: bool,
}

/// Sequencing node: compile each part in order, yield the last part's output.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlList {
    pub parts: Vec<RelId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelOp {
    BaseTable(BaseTable),
    Project(Project),
    Select(Select),
    Join(Join),
    GroupBy(GroupBy),
    TopN(TopN),
    Sample(Sample),
    SetOp(SetOp),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Truncate(Truncate),
    Ddl(DdlList),
}

impl RelOp {
    pub const fn name(&self) -> &'static str {
        match self {
            RelOp::BaseTable(_) => "base_table",
            RelOp::Project(_) => "project",
            RelOp::Select(_) => "select",
            RelOp::Join(_) => "join",
            RelOp::GroupBy(_) => "group_by",
            RelOp::TopN(_) => "top_n",
            RelOp::Sample(_) => "sample",
            RelOp::SetOp(_) => "set_op",
            RelOp::Insert(_) => "insert",
            RelOp::Update(_) => "update",
            RelOp::Delete(_) => "delete",
            RelOp::Truncate(_) => "truncate",
            RelOp::Ddl(_) => "ddl",
        }
    }
}

/// A relational operator with its node-level flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RelNode {
    pub op: RelOp,
    /// Deduplicate the output.
    pub distinct: bool,
    /// Enforce at most one output row at runtime.
    pub single: bool,
}

impl RelNode {
    pub fn new(op: RelOp) -> Self {
        RelNode {
            op,
            distinct: false,
            single: false,
        }
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_single(mut self) -> Self {
        self.single = true;
        self
    }
}

/// Arena of relational nodes. Owned upstream, read-only to the compiler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanTree {
    nodes: Vec<RelNode>,
    pub root: Option<RelId>,
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: RelNode) -> RelId {
        let id = RelId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Push a node and make it the root.
    pub fn push_root(&mut self, node: RelNode) -> RelId {
        let id = self.push(node);
        self.root = Some(id);
        id
    }

    pub fn node(&self, id: RelId) -> Result<&RelNode> {
        self.nodes
            .get(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("plan node out of bounds: {id}")))
    }

    pub fn root(&self) -> Result<RelId> {
        self.root
            .ok_or_else(|| DbError::new("plan tree has no root"))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
