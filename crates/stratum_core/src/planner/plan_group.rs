//! Grouping and aggregation.

use stratum_error::Result;

use super::plan_expr::ExprCtx;
use super::{ColumnStmt, PlanState, RelationStmt};
use crate::plan::operator::{GroupBy, PlanTree};
use crate::statements::Cardinality;
use crate::statements::ops::StatementOp;

impl PlanState<'_> {
    /// Incremental grouping over the lowered key columns, then every output
    /// expression evaluated with the grouping triple in scope. An empty key
    /// list degrades to global aggregation.
    pub(crate) fn plan_group_by(&mut self, tree: &PlanTree, n: &GroupBy) -> Result<RelationStmt> {
        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;

        let ctx = ExprCtx::over(&input);
        let mut key_ids = Vec::with_capacity(n.keys.len());
        for key in &n.keys {
            let v = self.lower_value(&ctx, key)?;
            // A constant key groups everything together; only row-valued
            // keys participate.
            if !v.scalar {
                key_ids.push(v.id);
            } else if let Some(head) = input.first_column() {
                let id = self.push(
                    StatementOp::ConstColumn {
                        head: head.id,
                        value: v.id,
                    },
                    v.datatype,
                    Cardinality::Column,
                );
                key_ids.push(id);
            }
        }
        let grp = self.group_columns(&key_ids)?;

        let out_ctx = ExprCtx::over(&input).with_grp(grp);
        let mut cols = Vec::with_capacity(n.outputs.len());
        for ne in &n.outputs {
            let v = self.lower_value(&out_ctx, &ne.expr)?;
            let mut col = ColumnStmt::new(v.id, &ne.table, &ne.name, v.datatype);
            col.scalar = v.scalar;
            col.outer_zero = v.outer_zero;
            cols.push(col);
        }
        Ok(RelationStmt::new(cols))
    }
}
