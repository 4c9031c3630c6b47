//! Set operations. Union is column-wise concatenation; except and intersect
//! are grouping arithmetic: group both sides on all columns, match the group
//! representatives with a null-tolerant equi-join, and expand each surviving
//! group back to its computed multiplicity.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_join::EquiCol;
use super::{PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::plan::expr::ScalarFunc;
use crate::plan::operator::{PlanTree, SetOp, SetOpKind};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

impl PlanState<'_> {
    pub(crate) fn plan_set_op(
        &mut self,
        tree: &PlanTree,
        n: &SetOp,
        distinct: bool,
    ) -> Result<RelationStmt> {
        // An all-scalar side (a one-row VALUES projection) is promoted to
        // one-row columns so appends and grouping see matching shapes.
        let left = self.plan_rel(tree, n.left)?;
        let left = self.materialized(left)?;
        let left = self.rows_relation(left);
        let right = self.plan_rel(tree, n.right)?;
        let right = self.materialized(right)?;
        let right = self.rows_relation(right);

        if left.cols.len() != right.cols.len() {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                format!(
                    "set operation arity mismatch: {} vs {} columns",
                    left.cols.len(),
                    right.cols.len()
                ),
            ));
        }

        match n.kind {
            SetOpKind::Union => {
                // Caller deduplicates when the node is marked distinct.
                let mut cols = left.cols;
                for (col, rcol) in cols.iter_mut().zip(&right.cols) {
                    col.id = self.push(
                        StatementOp::Append {
                            left: col.id,
                            right: rcol.id,
                        },
                        col.datatype,
                        Cardinality::Column,
                    );
                }
                Ok(RelationStmt::new(cols))
            }
            SetOpKind::Except => self.except_intersect(&left, &right, distinct, true),
            SetOpKind::Intersect => self.except_intersect(&left, &right, distinct, false),
        }
    }

    fn except_intersect(
        &mut self,
        left: &RelationStmt,
        right: &RelationStmt,
        distinct: bool,
        except: bool,
    ) -> Result<RelationStmt> {
        let lids: Vec<StmtId> = left.cols.iter().map(|c| c.id).collect();
        let rids: Vec<StmtId> = right.cols.iter().map(|c| c.id).collect();
        let lg = self.group_columns(&lids)?.ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "set operation without columns")
        })?;
        let rg = self.group_columns(&rids)?.ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "set operation without columns")
        })?;

        // Distinct semantics cap every multiplicity at one.
        let one = self.lit_i64(1);
        let lcnt = if distinct {
            self.push(
                StatementOp::ConstColumn {
                    head: lg.extent,
                    value: one,
                },
                DataType::Int64,
                Cardinality::Column,
            )
        } else {
            lg.counts
        };
        let rcnt = if distinct {
            self.push(
                StatementOp::ConstColumn {
                    head: rg.extent,
                    value: one,
                },
                DataType::Int64,
                Cardinality::Column,
            )
        } else {
            rg.counts
        };

        // Null-tolerant matching of the group representatives; in set
        // operations null equals null.
        let mut equis = Vec::with_capacity(left.cols.len());
        for (lcol, rcol) in left.cols.iter().zip(&right.cols) {
            let lrep = self.project(lg.extent, lcol.id, lcol.datatype);
            let rrep = self.project(rg.extent, rcol.id, rcol.datatype);
            equis.push(EquiCol {
                left: lrep,
                right: rrep,
                datatype: lcol.datatype,
                is_semantics: true,
            });
        }
        let (jl, jr) = self.releqjoin(&equis)?;

        let matched_l = self.project(jl, lcnt, DataType::Int64);
        let matched_r = self.project(jr, rcnt, DataType::Int64);

        let (extent, counts) = if except {
            // max(0, lcnt - rcnt) for matched groups, full lcnt for the rest.
            let diff = self.push(
                StatementOp::Call {
                    func: ScalarFunc::Sub,
                    inputs: vec![matched_l, matched_r],
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let zero = self.lit_i64(0);
            let clamped = self.push(
                StatementOp::Call {
                    func: ScalarFunc::Max,
                    inputs: vec![zero, diff],
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let matched_ext = self.project(jl, lg.extent, DataType::Int64);

            let all = self.mirror(lg.extent);
            let unmatched = self.push(
                StatementOp::Tdiff {
                    left: all,
                    right: jl,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let un_ext = self.project(unmatched, lg.extent, DataType::Int64);
            let un_cnt = self.project(unmatched, lcnt, DataType::Int64);

            let extent = self.push(
                StatementOp::Append {
                    left: matched_ext,
                    right: un_ext,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let counts = self.push(
                StatementOp::Append {
                    left: clamped,
                    right: un_cnt,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            (extent, counts)
        } else {
            // min(lcnt, rcnt), matched groups only.
            let counts = self.push(
                StatementOp::Call {
                    func: ScalarFunc::Min,
                    inputs: vec![matched_l, matched_r],
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let extent = self.project(jl, lg.extent, DataType::Int64);
            (extent, counts)
        };

        let rows = self.push(
            StatementOp::Expand { extent, counts },
            DataType::Int64,
            Cardinality::Column,
        );
        let mut cols = left.cols.clone();
        for col in &mut cols {
            col.id = self.project(rows, col.id, col.datatype);
        }
        Ok(RelationStmt::new(cols))
    }
}
