//! Top-N: bounded ordering with offset folding. When the input is an ordered
//! projection the sort keys drive incremental limit steps instead of a full
//! sort; the offset folds into the bound of every partial step and is applied
//! by the final one.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_expr::ExprCtx;
use super::{ColumnStmt, PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::plan::expr::ScalarFunc;
use crate::plan::operator::{PlanTree, Project, RelOp, TopN};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

impl PlanState<'_> {
    pub(crate) fn plan_top_n(&mut self, tree: &PlanTree, n: &TopN) -> Result<RelationStmt> {
        if n.limit.is_none() && n.offset.is_none() {
            return self.plan_rel(tree, n.input);
        }

        // Peek through an ordered projection that is not shared elsewhere;
        // its sort keys become limit steps.
        let child = tree.node(n.input)?;
        if let RelOp::Project(p) = &child.op {
            if !p.order.is_empty()
                && !child.distinct
                && !child.single
                && !self.is_cached(n.input)
            {
                return self.ordered_top_n(tree, n, p);
            }
        }

        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;
        let head = input.first_column().map(|c| c.id).ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "limit over scalar relation")
        })?;
        let (count, offset) = self.limit_bounds(&input, n)?;
        let all = self.mirror(head);
        let ids = self.push(
            StatementOp::Limit {
                input: all,
                prev_piv: None,
                prev_groups: None,
                count,
                offset,
                desc: false,
                nulls_last: false,
                last: true,
            },
            DataType::Int64,
            Cardinality::Column,
        );

        let mut cols = input.cols;
        for col in &mut cols {
            if !col.scalar {
                col.id = self.project(ids, col.id, col.datatype);
            }
        }
        Ok(RelationStmt::new(cols))
    }

    /// Lower the limit and offset expressions. Partial steps must retain the
    /// first `limit + offset` rows, so the returned count already folds the
    /// offset in; the final step subtracts it again by skipping.
    fn limit_bounds(
        &mut self,
        input: &RelationStmt,
        n: &TopN,
    ) -> Result<(StmtId, Option<StmtId>)> {
        let ctx = ExprCtx::over(input);
        let limit = match &n.limit {
            Some(e) => {
                let v = self.lower_value(&ctx, e)?;
                if !v.scalar {
                    return Err(DbError::with_kind(
                        DbErrorKind::Semantic,
                        "limit must be scalar",
                    ));
                }
                v.id
            }
            None => self.lit_i64(i64::MAX),
        };
        let offset = match &n.offset {
            Some(e) => {
                let v = self.lower_value(&ctx, e)?;
                if !v.scalar {
                    return Err(DbError::with_kind(
                        DbErrorKind::Semantic,
                        "offset must be scalar",
                    ));
                }
                Some(v.id)
            }
            None => None,
        };
        // Without an explicit limit the count stays saturated; folding the
        // offset into i64::MAX would wrap negative.
        let count = match offset {
            Some(off) if n.limit.is_some() => self.push(
                StatementOp::Call {
                    func: ScalarFunc::Add,
                    inputs: vec![limit, off],
                },
                DataType::Int64,
                Cardinality::Scalar,
            ),
            _ => limit,
        };
        Ok((count, offset))
    }

    fn ordered_top_n(
        &mut self,
        tree: &PlanTree,
        n: &TopN,
        p: &Project,
    ) -> Result<RelationStmt> {
        let input = self.plan_rel(tree, p.input)?;
        let input = self.materialized(input)?;

        let ctx = ExprCtx::over(&input);
        let mut cols = Vec::with_capacity(p.exprs.len());
        for ne in &p.exprs {
            let v = self.lower_value(&ctx, &ne.expr)?;
            let mut col = ColumnStmt::new(v.id, &ne.table, &ne.name, v.datatype);
            col.scalar = v.scalar;
            col.outer_zero = v.outer_zero;
            cols.push(col);
        }
        let out = RelationStmt::new(cols);

        let (count, offset) = self.limit_bounds(&input, n)?;

        // The first two keys run as partial limit steps; deeper keys refine
        // ordering within the surviving superset; the last key finalizes.
        let mut piv: Option<StmtId> = None;
        let mut groups: Option<StmtId> = None;
        let mut final_ids: Option<StmtId> = None;
        let nkeys = p.order.len();
        for (i, key) in p.order.iter().enumerate() {
            let col = self.order_key_column(&input, &out, key)?;
            let last = i + 1 == nkeys;
            if last {
                final_ids = Some(self.push(
                    StatementOp::Limit {
                        input: col,
                        prev_piv: piv,
                        prev_groups: groups,
                        count,
                        offset,
                        desc: key.desc,
                        nulls_last: key.nulls_last,
                        last: true,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                ));
            } else if i < 2 {
                let lim = self.push(
                    StatementOp::Limit {
                        input: col,
                        prev_piv: piv,
                        prev_groups: groups,
                        count,
                        offset: None,
                        desc: key.desc,
                        nulls_last: key.nulls_last,
                        last: false,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                );
                piv = Some(self.nth(lim, 0, DataType::Int64));
                groups = Some(self.nth(lim, 1, DataType::Int64));
            } else {
                let ord = self.push(
                    StatementOp::Order {
                        input: col,
                        prev_ids: piv,
                        prev_groups: groups,
                        desc: key.desc,
                        nulls_last: key.nulls_last,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                );
                piv = Some(self.nth(ord, 1, DataType::Int64));
                groups = Some(self.nth(ord, 2, DataType::Int64));
            }
        }
        let ids = final_ids.ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "ordered limit without sort keys")
        })?;

        let mut cols = out.cols;
        for col in &mut cols {
            if !col.scalar {
                col.id = self.project(ids, col.id, col.datatype);
            }
        }
        Ok(RelationStmt::new(cols))
    }
}
