//! Projection with optional result ordering, filtering, and sampling.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_expr::ExprCtx;
use super::{ColumnStmt, PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::plan::expr::{Expression, OrderKey};
use crate::plan::operator::{PlanTree, Project, Sample, Select};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

impl PlanState<'_> {
    pub(crate) fn plan_project(&mut self, tree: &PlanTree, n: &Project) -> Result<RelationStmt> {
        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;

        let ctx = ExprCtx::over(&input);
        let mut cols = Vec::with_capacity(n.exprs.len());
        for ne in &n.exprs {
            let v = self.lower_value(&ctx, &ne.expr)?;
            let mut col = ColumnStmt::new(v.id, &ne.table, &ne.name, v.datatype);
            col.scalar = v.scalar;
            col.outer_zero = v.outer_zero;
            cols.push(col);
        }
        let mut rel = RelationStmt::new(cols);

        if !n.order.is_empty() {
            let ids = self.order_ids(&input, &rel, &n.order)?;
            for col in &mut rel.cols {
                if !col.scalar {
                    col.id = self.project(ids, col.id, col.datatype);
                }
            }
            rel.reindex();
        }

        Ok(rel)
    }

    /// Row positions of the input in the requested order. Keys resolve
    /// against the projected outputs first and the input second; all columns
    /// involved share the input's row domain.
    fn order_ids(
        &mut self,
        input: &RelationStmt,
        out: &RelationStmt,
        order: &[OrderKey],
    ) -> Result<StmtId> {
        let mut ids: Option<StmtId> = None;
        let mut groups: Option<StmtId> = None;
        for key in order {
            let col = self.order_key_column(input, out, key)?;
            let ord = self.push(
                StatementOp::Order {
                    input: col,
                    prev_ids: ids,
                    prev_groups: groups,
                    desc: key.desc,
                    nulls_last: key.nulls_last,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            ids = Some(self.nth(ord, 1, DataType::Int64));
            groups = Some(self.nth(ord, 2, DataType::Int64));
        }
        ids.ok_or_else(|| DbError::with_kind(DbErrorKind::Semantic, "empty order key list"))
    }

    pub(super) fn order_key_column(
        &mut self,
        input: &RelationStmt,
        out: &RelationStmt,
        key: &OrderKey,
    ) -> Result<StmtId> {
        if let Expression::Column(c) = &key.expr {
            if let Some(col) = out.bind(c.table.as_deref(), &c.column) {
                if !col.scalar {
                    return Ok(col.id);
                }
            }
        }
        let ctx = ExprCtx::over(input);
        let v = self.lower_value(&ctx, &key.expr)?;
        if v.scalar {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                "constant order key",
            ));
        }
        Ok(v.id)
    }

    /// Chain every predicate into one shrinking candidate set.
    pub(crate) fn plan_filter(&mut self, tree: &PlanTree, n: &Select) -> Result<RelationStmt> {
        let mut rel = self.plan_rel(tree, n.input)?;
        for predicate in &n.predicates {
            let cand = self.lower_select(&rel, rel.cand, predicate)?;
            rel.cand = Some(cand);
        }
        Ok(rel)
    }

    pub(crate) fn plan_sample(&mut self, tree: &PlanTree, n: &Sample) -> Result<RelationStmt> {
        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;
        let head = input.first_column().map(|c| c.id).ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "sample over scalar relation")
        })?;

        let ctx = ExprCtx::over(&input);
        let size = self.lower_value(&ctx, &n.size)?;
        if !size.scalar {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                "sample size must be scalar",
            ));
        }
        let ids = self.push(
            StatementOp::Sample {
                input: head,
                size: size.id,
                seed: n.seed.unwrap_or(0),
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
}
