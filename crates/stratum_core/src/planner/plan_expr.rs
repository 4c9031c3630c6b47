//! Expression lowering: scalar/aggregate expression trees into statement
//! chains, in value context (producing a column or scalar) or select context
//! (producing a narrowed candidate set).

use stratum_error::{DbError, DbErrorKind, Result};

use super::{ColumnStmt, GroupingCtx, PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::plan::expr::{
    AggregateExpr,
    CaseExpr,
    CmpOp,
    CoalesceExpr,
    ComparisonExpr,
    Expression,
    InListExpr,
    ScalarFunc,
};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

/// Bindings in scope while lowering one expression.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExprCtx<'a> {
    pub left: Option<&'a RelationStmt>,
    pub right: Option<&'a RelationStmt>,
    pub grp: Option<GroupingCtx>,
}

impl<'a> ExprCtx<'a> {
    pub fn over(left: &'a RelationStmt) -> Self {
        ExprCtx {
            left: Some(left),
            right: None,
            grp: None,
        }
    }

    pub fn with_grp(mut self, grp: Option<GroupingCtx>) -> Self {
        self.grp = grp;
        self
    }

    fn without_grp(self) -> Self {
        ExprCtx { grp: None, ..self }
    }
}

/// A lowered value expression.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueStmt {
    pub id: StmtId,
    pub datatype: DataType,
    pub scalar: bool,
    pub outer_zero: bool,
}

impl ValueStmt {
    fn column(id: StmtId, datatype: DataType) -> Self {
        ValueStmt {
            id,
            datatype,
            scalar: false,
            outer_zero: false,
        }
    }

    fn scalar(id: StmtId, datatype: DataType) -> Self {
        ValueStmt {
            id,
            datatype,
            scalar: true,
            outer_zero: false,
        }
    }

    fn card(&self) -> Cardinality {
        if self.scalar {
            Cardinality::Scalar
        } else {
            Cardinality::Column
        }
    }
}

impl PlanState<'_> {
    /// Lower an expression in value context.
    pub(crate) fn lower_value(&mut self, ctx: &ExprCtx, e: &Expression) -> Result<ValueStmt> {
        match e {
            Expression::Literal(lit) => {
                let id = self.lit(lit.value.clone(), lit.datatype);
                Ok(ValueStmt::scalar(id, lit.datatype))
            }
            Expression::Column(col) => {
                let bound = self.resolve_column(ctx, col.table.as_deref(), &col.column)?;
                // Grouping reprojects through the representative rows.
                if let (Some(grp), false) = (ctx.grp, bound.scalar) {
                    let id = self.project(grp.extent, bound.id, bound.datatype);
                    return Ok(ValueStmt::column(id, bound.datatype));
                }
                Ok(ValueStmt {
                    id: bound.id,
                    datatype: bound.datatype,
                    scalar: bound.scalar,
                    outer_zero: false,
                })
            }
            Expression::Cast(cast) => {
                let input = self.lower_value(ctx, &cast.expr)?;
                let id = self.push(
                    StatementOp::Cast {
                        input: input.id,
                        to: cast.to,
                    },
                    cast.to,
                    input.card(),
                );
                Ok(ValueStmt {
                    id,
                    datatype: cast.to,
                    scalar: input.scalar,
                    outer_zero: false,
                })
            }
            Expression::Scalar(func) => {
                let mut inputs = Vec::with_capacity(func.inputs.len());
                let mut scalar = true;
                for input in &func.inputs {
                    let v = self.lower_value(ctx, input)?;
                    scalar &= v.scalar;
                    inputs.push(v.id);
                }
                let card = if scalar {
                    Cardinality::Scalar
                } else {
                    Cardinality::Column
                };
                let id = self.push(
                    StatementOp::Call {
                        func: func.func,
                        inputs,
                    },
                    func.datatype,
                    card,
                );
                Ok(ValueStmt {
                    id,
                    datatype: func.datatype,
                    scalar,
                    outer_zero: false,
                })
            }
            Expression::Comparison(cmp) => self.lower_comparison_value(ctx, cmp),
            Expression::Aggregate(agg) => self.lower_aggregate(ctx, agg),
            Expression::Case(case) => self.lower_case(ctx, case),
            Expression::Coalesce(coalesce) => self.lower_coalesce(ctx, coalesce),
            Expression::InList(inlist) => self.lower_in_list_value(ctx, inlist),
        }
    }

    fn resolve_column(
        &self,
        ctx: &ExprCtx,
        table: Option<&str>,
        name: &str,
    ) -> Result<ColumnStmt> {
        if let Some(col) = ctx.left.and_then(|rel| rel.bind(table, name)) {
            return Ok(col.clone());
        }
        if let Some(col) = ctx.right.and_then(|rel| rel.bind(table, name)) {
            return Ok(col.clone());
        }
        Err(DbError::with_kind(
            DbErrorKind::Unresolved,
            match table {
                Some(table) => format!("unresolved column '{table}.{name}'"),
                None => format!("unresolved column '{name}'"),
            },
        ))
    }

    fn lower_comparison_value(&mut self, ctx: &ExprCtx, cmp: &ComparisonExpr) -> Result<ValueStmt> {
        let left = self.lower_value(ctx, &cmp.left)?;
        let right = self.lower_value(ctx, &cmp.right)?;
        let card = if left.scalar && right.scalar {
            Cardinality::Scalar
        } else {
            Cardinality::Column
        };
        let mut out = self.cmp(cmp.op, left.id, right.id, card);
        if let Some(right2) = &cmp.right2 {
            let upper = self.lower_value(ctx, right2)?;
            let hi = self.cmp(CmpOp::LtEq, left.id, upper.id, card);
            out = self.push(
                StatementOp::Call {
                    func: ScalarFunc::And,
                    inputs: vec![out, hi],
                },
                DataType::Boolean,
                card,
            );
        }
        if cmp.anti {
            out = self.push(
                StatementOp::Call {
                    func: ScalarFunc::Not,
                    inputs: vec![out],
                },
                DataType::Boolean,
                card,
            );
        }
        Ok(ValueStmt {
            id: out,
            datatype: DataType::Boolean,
            scalar: card == Cardinality::Scalar,
            outer_zero: false,
        })
    }

    fn lower_aggregate(&mut self, ctx: &ExprCtx, agg: &AggregateExpr) -> Result<ValueStmt> {
        // Arguments are per-row over the grouped input; no reprojection.
        let arg_ctx = ctx.without_grp();
        let input = match &agg.input {
            Some(input) => Some(self.lower_value(&arg_ctx, input)?),
            None => None,
        };

        let input = match input {
            Some(v) => Some(v),
            None => {
                // COUNT(*): cheapest column, purely for cardinality.
                let rel = ctx.left.ok_or_else(|| {
                    DbError::with_kind(DbErrorKind::Semantic, "count(*) without input relation")
                })?;
                let smallest = rel
                    .cols
                    .iter()
                    .filter(|c| !c.scalar)
                    .min_by_key(|c| c.datatype.value_width());
                smallest.map(|c| ValueStmt::column(c.id, c.datatype))
            }
        };

        match ctx.grp {
            Some(grp) => {
                let (input_id, groups, extent) = match (input, agg.distinct) {
                    (Some(v), true) => {
                        // Pre-deduplicate the argument within each group.
                        let g2 = self.push(
                            StatementOp::Group {
                                input: v.id,
                                prev_groups: Some(grp.groups),
                            },
                            DataType::Int64,
                            Cardinality::Column,
                        );
                        let ext2 = self.nth(g2, 1, DataType::Int64);
                        let arg = self.project(ext2, v.id, v.datatype);
                        let gids = self.project(ext2, grp.groups, DataType::Int64);
                        (Some(arg), Some(gids), Some(grp.extent))
                    }
                    (Some(v), false) => (Some(v.id), Some(grp.groups), Some(grp.extent)),
                    (None, _) => (None, Some(grp.groups), Some(grp.extent)),
                };
                let id = self.push(
                    StatementOp::Aggregate {
                        func: agg.func,
                        input: input_id,
                        groups,
                        extent,
                        skip_nils: agg.skip_nils,
                    },
                    agg.datatype,
                    Cardinality::Column,
                );
                Ok(ValueStmt {
                    id,
                    datatype: agg.datatype,
                    scalar: false,
                    outer_zero: agg.outer_zero,
                })
            }
            None => {
                let input_id = match (input, agg.distinct) {
                    (Some(v), true) => {
                        let grp = self.group_columns(&[v.id])?;
                        match grp {
                            Some(g) => Some(self.project(g.extent, v.id, v.datatype)),
                            None => Some(v.id),
                        }
                    }
                    (Some(v), false) => Some(v.id),
                    (None, _) => None,
                };
                let id = self.push(
                    StatementOp::Aggregate {
                        func: agg.func,
                        input: input_id,
                        groups: None,
                        extent: None,
                        skip_nils: agg.skip_nils,
                    },
                    agg.datatype,
                    Cardinality::Scalar,
                );
                Ok(ValueStmt {
                    id,
                    datatype: agg.datatype,
                    scalar: true,
                    outer_zero: agg.outer_zero,
                })
            }
        }
    }

    /// CASE compiled as candidate-narrowing: evaluate each branch over the
    /// remaining rows, scatter its results positionally, shrink the remaining
    /// set by the matched rows. Pure scalar inputs degrade to conditional
    /// evaluation.
    fn lower_case(&mut self, ctx: &ExprCtx, case: &CaseExpr) -> Result<ValueStmt> {
        let head = ctx.left.and_then(|rel| rel.first_column()).cloned();
        let Some(head) = head else {
            return self.lower_case_scalar(ctx, case);
        };

        let null = self.null_lit(case.datatype);
        let mut result = self.push(
            StatementOp::ConstColumn {
                head: head.id,
                value: null,
            },
            case.datatype,
            Cardinality::Column,
        );
        let mut remaining = ctx.left.and_then(|rel| rel.cand);

        let left_rel = ctx.left.ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "case without input relation")
        })?;
        for (when, then) in &case.branches {
            let hit = self.lower_select(left_rel, remaining, when)?;
            result = self.scatter_branch(ctx, result, hit, then, case.datatype)?;
            let prev = match remaining {
                Some(ids) => ids,
                None => self.mirror(result),
            };
            remaining = Some(self.push(
                StatementOp::Tdiff {
                    left: prev,
                    right: hit,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        if let (Some(otherwise), Some(rest)) = (&case.otherwise, remaining) {
            result = self.scatter_branch(ctx, result, rest, otherwise, case.datatype)?;
        } else if let Some(otherwise) = &case.otherwise {
            // No branch at all; the whole column is the else value.
            let v = self.lower_value(ctx, otherwise)?;
            let ids = self.mirror(result);
            result = self.scatter_branch_value(result, ids, v, case.datatype);
        }

        Ok(ValueStmt::column(result, case.datatype))
    }

    fn lower_case_scalar(&mut self, ctx: &ExprCtx, case: &CaseExpr) -> Result<ValueStmt> {
        let mut result = match &case.otherwise {
            Some(o) => self.lower_value(ctx, o)?.id,
            None => self.null_lit(case.datatype),
        };
        for (when, then) in case.branches.iter().rev() {
            let cond = self.lower_value(ctx, when)?;
            let value = self.lower_value(ctx, then)?;
            result = self.push(
                StatementOp::Call {
                    func: ScalarFunc::IfThenElse,
                    inputs: vec![cond.id, value.id, result],
                },
                case.datatype,
                Cardinality::Scalar,
            );
        }
        Ok(ValueStmt::scalar(result, case.datatype))
    }

    /// COALESCE narrows on "this argument is not null" instead of an explicit
    /// condition.
    fn lower_coalesce(&mut self, ctx: &ExprCtx, coalesce: &CoalesceExpr) -> Result<ValueStmt> {
        let head = ctx.left.and_then(|rel| rel.first_column()).cloned();
        let Some(head) = head else {
            // Scalar fallback: if_then_else(isnull(a), rest, a).
            let mut result = self.null_lit(coalesce.datatype);
            for e in coalesce.exprs.iter().rev() {
                let v = self.lower_value(ctx, e)?;
                let isnull = self.push(
                    StatementOp::Call {
                        func: ScalarFunc::IsNull,
                        inputs: vec![v.id],
                    },
                    DataType::Boolean,
                    Cardinality::Scalar,
                );
                result = self.push(
                    StatementOp::Call {
                        func: ScalarFunc::IfThenElse,
                        inputs: vec![isnull, result, v.id],
                    },
                    coalesce.datatype,
                    Cardinality::Scalar,
                );
            }
            return Ok(ValueStmt::scalar(result, coalesce.datatype));
        };

        let null = self.null_lit(coalesce.datatype);
        let mut result = self.push(
            StatementOp::ConstColumn {
                head: head.id,
                value: null,
            },
            coalesce.datatype,
            Cardinality::Column,
        );
        let mut remaining = ctx.left.and_then(|rel| rel.cand);

        for e in &coalesce.exprs {
            let v = self.lower_value(ctx, e)?;
            let nil = self.null_lit(v.datatype);
            let hit = if v.scalar {
                // A scalar settles the remaining rows only when it is not
                // null; broadcast it so the same non-null select decides.
                let broadcast = self.push(
                    StatementOp::ConstColumn {
                        head: result,
                        value: v.id,
                    },
                    v.datatype,
                    Cardinality::Column,
                );
                self.push(
                    StatementOp::SelectCmp {
                        input: broadcast,
                        op: CmpOp::Eq,
                        value: nil,
                        value2: None,
                        cand: remaining,
                        anti: true,
                        is_semantics: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                )
            } else {
                self.push(
                    StatementOp::SelectCmp {
                        input: v.id,
                        op: CmpOp::Eq,
                        value: nil,
                        value2: None,
                        cand: remaining,
                        anti: true,
                        is_semantics: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                )
            };
            result = self.scatter_branch_value(result, hit, v, coalesce.datatype);
            let prev = match remaining {
                Some(ids) => ids,
                None => self.mirror(result),
            };
            remaining = Some(self.push(
                StatementOp::Tdiff {
                    left: prev,
                    right: hit,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        Ok(ValueStmt::column(result, coalesce.datatype))
    }

    fn scatter_branch(
        &mut self,
        ctx: &ExprCtx,
        target: StmtId,
        ids: StmtId,
        value: &Expression,
        datatype: DataType,
    ) -> Result<StmtId> {
        let v = self.lower_value(ctx, value)?;
        Ok(self.scatter_branch_value(target, ids, v, datatype))
    }

    fn scatter_branch_value(
        &mut self,
        target: StmtId,
        ids: StmtId,
        value: ValueStmt,
        datatype: DataType,
    ) -> StmtId {
        let values = if value.scalar {
            self.push(
                StatementOp::ConstColumn {
                    head: ids,
                    value: value.id,
                },
                datatype,
                Cardinality::Column,
            )
        } else {
            self.project(ids, value.id, datatype)
        };
        self.push(
            StatementOp::Replace {
                target,
                ids,
                values,
            },
            datatype,
            Cardinality::Column,
        )
    }

    fn lower_in_list_value(&mut self, ctx: &ExprCtx, inlist: &InListExpr) -> Result<ValueStmt> {
        let rel = ctx.left.ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "IN list without input relation")
        })?;
        let probe = self.lower_value(ctx, &inlist.expr)?;
        let list_has_null = inlist
            .list
            .iter()
            .any(|e| matches!(e, Expression::Literal(l) if l.value.is_null()));

        let matched = self.lower_in_list(
            rel,
            None,
            &InListExpr {
                negated: false,
                ..inlist.clone()
            },
        )?;

        // Three-valued result: matched rows decide, null probes and null list
        // elements leave the answer unknown.
        let default = if list_has_null {
            ScalarValue::Null
        } else {
            ScalarValue::Boolean(inlist.negated)
        };
        let default = self.lit(default, DataType::Boolean);
        let base = self.push(
            StatementOp::ConstColumn {
                head: probe.id,
                value: default,
            },
            DataType::Boolean,
            Cardinality::Column,
        );
        let decided = self.lit_bool(!inlist.negated);
        let decided_col = self.push(
            StatementOp::ConstColumn {
                head: matched,
                value: decided,
            },
            DataType::Boolean,
            Cardinality::Column,
        );
        let mut result = self.push(
            StatementOp::Replace {
                target: base,
                ids: matched,
                values: decided_col,
            },
            DataType::Boolean,
            Cardinality::Column,
        );

        let nil = self.null_lit(probe.datatype);
        let nil_probe = self.push(
            StatementOp::SelectCmp {
                input: probe.id,
                op: CmpOp::Eq,
                value: nil,
                value2: None,
                cand: None,
                anti: false,
                is_semantics: true,
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let null_bool = self.null_lit(DataType::Boolean);
        let null_col = self.push(
            StatementOp::ConstColumn {
                head: nil_probe,
                value: null_bool,
            },
            DataType::Boolean,
            Cardinality::Column,
        );
        result = self.push(
            StatementOp::Replace {
                target: result,
                ids: nil_probe,
                values: null_col,
            },
            DataType::Boolean,
            Cardinality::Column,
        );

        Ok(ValueStmt::column(result, DataType::Boolean))
    }

    /// Lower a predicate in select context: narrow `cand` over the relation.
    pub(crate) fn lower_select(
        &mut self,
        rel: &RelationStmt,
        cand: Option<StmtId>,
        e: &Expression,
    ) -> Result<StmtId> {
        match e {
            Expression::Comparison(cmp) => self.lower_select_cmp(rel, cand, cmp),
            Expression::InList(inlist) => self.lower_in_list(rel, cand, inlist),
            Expression::Scalar(f) if f.func == ScalarFunc::And => {
                let mut cand = cand;
                for input in &f.inputs {
                    cand = Some(self.lower_select(rel, cand, input)?);
                }
                cand.ok_or_else(|| {
                    DbError::with_kind(DbErrorKind::Semantic, "empty conjunction in select")
                })
            }
            Expression::Scalar(f) if f.func == ScalarFunc::Or => {
                let mut out: Option<StmtId> = None;
                for input in &f.inputs {
                    let ids = self.lower_select(rel, cand, input)?;
                    out = Some(match out {
                        None => ids,
                        Some(prev) => self.push(
                            StatementOp::Tunion {
                                left: prev,
                                right: ids,
                            },
                            DataType::Int64,
                            Cardinality::Column,
                        ),
                    });
                }
                out.ok_or_else(|| {
                    DbError::with_kind(DbErrorKind::Semantic, "empty disjunction in select")
                })
            }
            _ => {
                // Generic n-ary path: evaluate to a boolean column and keep
                // the true rows.
                let ctx = ExprCtx::over(rel);
                let v = self.lower_value(&ctx, e)?;
                let t = self.lit_bool(true);
                if v.scalar {
                    let head = rel.first_column().map(|c| c.id).ok_or_else(|| {
                        DbError::with_kind(
                            DbErrorKind::Semantic,
                            "row-valued predicate over scalar relation",
                        )
                    })?;
                    let col = self.push(
                        StatementOp::ConstColumn {
                            head,
                            value: v.id,
                        },
                        DataType::Boolean,
                        Cardinality::Column,
                    );
                    return Ok(self.push(
                        StatementOp::SelectCmp {
                            input: col,
                            op: CmpOp::Eq,
                            value: t,
                            value2: None,
                            cand,
                            anti: false,
                            is_semantics: false,
                        },
                        DataType::Int64,
                        Cardinality::Column,
                    ));
                }
                Ok(self.push(
                    StatementOp::SelectCmp {
                        input: v.id,
                        op: CmpOp::Eq,
                        value: t,
                        value2: None,
                        cand,
                        anti: false,
                        is_semantics: false,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ))
            }
        }
    }

    fn lower_select_cmp(
        &mut self,
        rel: &RelationStmt,
        cand: Option<StmtId>,
        cmp: &ComparisonExpr,
    ) -> Result<StmtId> {
        let ctx = ExprCtx::over(rel);
        let mut left = self.lower_value(&ctx, &cmp.left)?;
        let mut right = self.lower_value(&ctx, &cmp.right)?;
        let mut op = cmp.op;
        let mut right2 = match &cmp.right2 {
            Some(r2) => Some(self.lower_value(&ctx, r2)?),
            None => None,
        };

        if left.scalar && !right.scalar && right2.is_none() {
            std::mem::swap(&mut left, &mut right);
            op = op.flip();
        }

        if left.scalar {
            // Fully scalar condition; evaluate once and select all or
            // nothing.
            let scalar = self.lower_comparison_value(&ExprCtx::over(rel), cmp)?;
            let head = rel.first_column().map(|c| c.id).ok_or_else(|| {
                DbError::with_kind(
                    DbErrorKind::Semantic,
                    "scalar predicate over scalar relation",
                )
            })?;
            let col = self.push(
                StatementOp::ConstColumn {
                    head,
                    value: scalar.id,
                },
                DataType::Boolean,
                Cardinality::Column,
            );
            let t = self.lit_bool(true);
            return Ok(self.push(
                StatementOp::SelectCmp {
                    input: col,
                    op: CmpOp::Eq,
                    value: t,
                    value2: None,
                    cand,
                    anti: false,
                    is_semantics: false,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        let value = self.select_operand(right, cand);
        let value2 = match right2.take() {
            Some(v) => Some(self.select_operand(v, cand)),
            None => None,
        };
        Ok(self.push(
            StatementOp::SelectCmp {
                input: left.id,
                op,
                value,
                value2,
                cand,
                anti: cmp.anti,
                is_semantics: cmp.is_semantics,
            },
            DataType::Int64,
            Cardinality::Column,
        ))
    }

    /// A select reads its comparison value by candidate position, so a
    /// row-valued operand must be projected into the candidate domain first.
    fn select_operand(&mut self, v: ValueStmt, cand: Option<StmtId>) -> StmtId {
        match (cand, v.scalar) {
            (Some(cand), false) => self.project(cand, v.id, v.datatype),
            _ => v.id,
        }
    }

    /// IN/NOT IN in select context. Small lists expand to chained selects;
    /// large literal lists are materialized, deduplicated by grouping, and
    /// probed with a semijoin (or difference for NOT IN).
    pub(crate) fn lower_in_list(
        &mut self,
        rel: &RelationStmt,
        cand: Option<StmtId>,
        inlist: &InListExpr,
    ) -> Result<StmtId> {
        let ctx = ExprCtx::over(rel);
        let probe = self.lower_value(&ctx, &inlist.expr)?;

        let list_has_null = inlist
            .list
            .iter()
            .any(|e| matches!(e, Expression::Literal(l) if l.value.is_null()));

        if inlist.negated && list_has_null {
            // NOT IN over a list with a null element matches nothing,
            // whatever the probe value. Kept bit-for-bit: a non-tolerant
            // equality against null selects no rows.
            let nil = self.null_lit(probe.datatype);
            return Ok(self.push(
                StatementOp::SelectCmp {
                    input: probe.id,
                    op: CmpOp::Eq,
                    value: nil,
                    value2: None,
                    cand,
                    anti: false,
                    is_semantics: false,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        if inlist.list.is_empty() {
            if inlist.negated {
                // NOT IN () holds vacuously for non-null probes.
                let nil = self.null_lit(probe.datatype);
                return Ok(self.push(
                    StatementOp::SelectCmp {
                        input: probe.id,
                        op: CmpOp::Eq,
                        value: nil,
                        value2: None,
                        cand,
                        anti: true,
                        is_semantics: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ));
            }
            let nil = self.null_lit(probe.datatype);
            return Ok(self.push(
                StatementOp::SelectCmp {
                    input: probe.id,
                    op: CmpOp::Eq,
                    value: nil,
                    value2: None,
                    cand,
                    anti: false,
                    is_semantics: false,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        let literals: Option<Vec<ScalarValue>> = inlist
            .list
            .iter()
            .map(|e| match e {
                Expression::Literal(l) => Some(l.value.clone()),
                _ => None,
            })
            .collect();

        if let Some(values) = literals.filter(|v| v.len() >= self.config.in_list_threshold) {
            let list = self.push(
                StatementOp::ValueList { values },
                probe.datatype,
                Cardinality::Column,
            );
            let grp = self.group_columns(&[list])?.ok_or_else(|| {
                DbError::with_kind(DbErrorKind::Semantic, "empty IN list materialization")
            })?;
            let dedup = self.project(grp.extent, list, probe.datatype);

            if inlist.negated {
                let nil = self.null_lit(probe.datatype);
                let nonnil = self.push(
                    StatementOp::SelectCmp {
                        input: probe.id,
                        op: CmpOp::Eq,
                        value: nil,
                        value2: None,
                        cand,
                        anti: true,
                        is_semantics: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                );
                return Ok(self.push(
                    StatementOp::Semijoin {
                        left: probe.id,
                        right: dedup,
                        cand: Some(nonnil),
                        anti: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ));
            }
            return Ok(self.push(
                StatementOp::Semijoin {
                    left: probe.id,
                    right: dedup,
                    cand,
                    anti: false,
                },
                DataType::Int64,
                Cardinality::Column,
            ));
        }

        if inlist.negated {
            // AND-chain of anti equality selects; nulls drop at the first
            // step.
            let mut cand = cand;
            for elem in &inlist.list {
                let v = self.lower_value(&ctx, elem)?;
                let value = self.select_operand(v, cand);
                cand = Some(self.push(
                    StatementOp::SelectCmp {
                        input: probe.id,
                        op: CmpOp::Eq,
                        value,
                        value2: None,
                        cand,
                        anti: true,
                        is_semantics: false,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ));
            }
            return cand.ok_or_else(|| {
                DbError::with_kind(DbErrorKind::Semantic, "empty NOT IN expansion")
            });
        }

        // OR-chain: union of equality selections.
        let mut out: Option<StmtId> = None;
        for elem in &inlist.list {
            let v = self.lower_value(&ctx, elem)?;
            let value = self.select_operand(v, cand);
            let ids = self.push(
                StatementOp::SelectCmp {
                    input: probe.id,
                    op: CmpOp::Eq,
                    value,
                    value2: None,
                    cand,
                    anti: false,
                    is_semantics: false,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            out = Some(match out {
                None => ids,
                Some(prev) => self.push(
                    StatementOp::Tunion {
                        left: prev,
                        right: ids,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ),
            });
        }
        out.ok_or_else(|| DbError::with_kind(DbErrorKind::Semantic, "empty IN expansion"))
    }
}
