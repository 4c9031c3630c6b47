use std::fmt;

use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

/// Comparison operators usable in selects and join conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    pub const fn flip(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::NotEq => CmpOp::NotEq,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "<>",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        };
        write!(f, "{s}")
    }
}

/// Scalar functions. Bindings are resolved upstream; an unknown function never
/// reaches the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFunc {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    IsNull,
    /// `if_then_else(cond, a, b)`, null condition selects `b`.
    IfThenElse,
    /// Binary minimum, null-propagating.
    Min,
    /// Binary maximum, null-propagating.
    Max,
    /// Deterministic value hash, never null.
    Hash,
    /// `rotate_xor_hash(h, v)`: rotate the accumulated hash left by `bits`
    /// and fold in the hash of `v`. Combines multi-column keys into one.
    RotateXorHash { bits: u32 },
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggrFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    /// True when any tie group of the (sorted) input holds more than one row.
    /// Drives within-batch uniqueness checks.
    NotUnique,
    /// The single value of a group, raising a cardinality error when the
    /// group holds more than one row; null when empty.
    ZeroOrOne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    pub value: ScalarValue,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnExpr {
    /// Qualifying table or alias name; unqualified refs search all bindings.
    pub table: Option<String>,
    pub column: String,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastExpr {
    pub expr: Box<Expression>,
    pub to: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarFuncExpr {
    pub func: ScalarFunc,
    pub inputs: Vec<Expression>,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonExpr {
    pub op: CmpOp,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    /// Upper bound for range (BETWEEN-like) predicates; `op` then applies to
    /// the lower bound and `Lt`/`LtEq` semantics to this one.
    pub right2: Option<Box<Expression>>,
    /// Negate the selection.
    pub anti: bool,
    /// Null-tolerant equality: NULL compares equal to NULL.
    pub is_semantics: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggrFunc,
    /// None for COUNT(*).
    pub input: Option<Box<Expression>>,
    pub distinct: bool,
    pub skip_nils: bool,
    /// Under an outer join, report zero instead of null for unmatched
    /// groups. Set by the upstream optimizer on countable aggregates.
    pub outer_zero: bool,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpr {
    pub branches: Vec<(Expression, Expression)>,
    pub otherwise: Option<Box<Expression>>,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoalesceExpr {
    pub exprs: Vec<Expression>,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InListExpr {
    pub expr: Box<Expression>,
    pub list: Vec<Expression>,
    pub negated: bool,
}

/// A typed scalar or aggregate expression. Types are resolved upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(LiteralExpr),
    Column(ColumnExpr),
    Cast(CastExpr),
    Scalar(ScalarFuncExpr),
    Comparison(ComparisonExpr),
    Aggregate(AggregateExpr),
    Case(CaseExpr),
    Coalesce(CoalesceExpr),
    InList(InListExpr),
}

impl Expression {
    pub fn datatype(&self) -> DataType {
        match self {
            Expression::Literal(e) => e.datatype,
            Expression::Column(e) => e.datatype,
            Expression::Cast(e) => e.to,
            Expression::Scalar(e) => e.datatype,
            Expression::Comparison(_) => DataType::Boolean,
            Expression::Aggregate(e) => e.datatype,
            Expression::Case(e) => e.datatype,
            Expression::Coalesce(e) => e.datatype,
            Expression::InList(_) => DataType::Boolean,
        }
    }

    /// Walk the expression, visiting children pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expression)) {
        visit(self);
        match self {
            Expression::Literal(_) | Expression::Column(_) => {}
            Expression::Cast(e) => e.expr.walk(visit),
            Expression::Scalar(e) => e.inputs.iter().for_each(|i| i.walk(visit)),
            Expression::Comparison(e) => {
                e.left.walk(visit);
                e.right.walk(visit);
                if let Some(r2) = &e.right2 {
                    r2.walk(visit);
                }
            }
            Expression::Aggregate(e) => {
                if let Some(input) = &e.input {
                    input.walk(visit);
                }
            }
            Expression::Case(e) => {
                for (when, then) in &e.branches {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(o) = &e.otherwise {
                    o.walk(visit);
                }
            }
            Expression::Coalesce(e) => e.exprs.iter().for_each(|i| i.walk(visit)),
            Expression::InList(e) => {
                e.expr.walk(visit);
                e.list.iter().for_each(|i| i.walk(visit));
            }
        }
    }
}

/// An output expression together with its `(table, column)` alias.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpr {
    pub expr: Expression,
    pub table: String,
    pub name: String,
}

impl NamedExpr {
    pub fn new(expr: Expression, table: impl Into<String>, name: impl Into<String>) -> Self {
        NamedExpr {
            expr,
            table: table.into(),
            name: name.into(),
        }
    }
}

/// One sort key: expression plus direction and null placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: Expression,
    pub desc: bool,
    pub nulls_last: bool,
}
