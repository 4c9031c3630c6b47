//! Join compilation: equi-join extraction, multi-column combined-hash joins
//! with collision verification, index-accelerated lookups, and outer-join
//! completion.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_expr::ExprCtx;
use super::{ColumnStmt, PlanState, RelationStmt, TID_COLUMN};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::{ScalarValue, combined_hash_bits};
use crate::plan::expr::{CmpOp, ComparisonExpr, Expression, ScalarFunc};
use crate::plan::operator::{Join, JoinKind, PlanTree};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

/// One lowered equi-join column pair, left and right aligned with their
/// relations' row domains.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EquiCol {
    pub left: StmtId,
    pub right: StmtId,
    pub datatype: DataType,
    /// Null-tolerant equality: null keys match null keys.
    pub is_semantics: bool,
}

fn zero_value(datatype: DataType) -> ScalarValue {
    match datatype {
        DataType::Boolean => ScalarValue::Boolean(false),
        DataType::Int32 => ScalarValue::Int32(0),
        DataType::Int64 => ScalarValue::Int64(0),
        DataType::Float64 => ScalarValue::Float64(0.0),
        DataType::Utf8 => ScalarValue::Utf8(String::new()),
    }
}

fn binds_in(rel: &RelationStmt, e: &Expression) -> bool {
    let mut ok = true;
    e.walk(&mut |node| {
        if let Expression::Column(c) = node {
            if rel.bind(c.table.as_deref(), &c.column).is_none() {
                ok = false;
            }
        }
    });
    ok
}

fn has_columns(e: &Expression) -> bool {
    let mut found = false;
    e.walk(&mut |node| {
        if matches!(node, Expression::Column(_)) {
            found = true;
        }
    });
    found
}

/// An equality predicate whose sides separate cleanly over the two inputs,
/// oriented left-to-right.
fn as_equi<'a>(
    left: &RelationStmt,
    right: &RelationStmt,
    e: &'a Expression,
) -> Option<(&'a Expression, &'a Expression, bool)> {
    let Expression::Comparison(ComparisonExpr {
        op: CmpOp::Eq,
        left: l,
        right: r,
        right2: None,
        anti: false,
        is_semantics,
    }) = e
    else {
        return None;
    };
    if !has_columns(l) || !has_columns(r) {
        return None;
    }
    if binds_in(left, l) && binds_in(right, r) {
        return Some((l, r, *is_semantics));
    }
    if binds_in(left, r) && binds_in(right, l) {
        return Some((r, l, *is_semantics));
    }
    None
}

impl PlanState<'_> {
    pub(crate) fn plan_join(&mut self, tree: &PlanTree, n: &Join) -> Result<RelationStmt> {
        let left = self.plan_rel(tree, n.left)?;
        let left = self.materialized(left)?;
        let right = self.plan_rel(tree, n.right)?;
        let right = self.materialized(right)?;

        // The leading run of separable equality predicates drives the join;
        // everything after the run filters the pair result.
        let mut equis: Vec<EquiCol> = Vec::new();
        let mut rest: Vec<&Expression> = Vec::new();
        for predicate in &n.predicates {
            if rest.is_empty() {
                if let Some((le, re, is_semantics)) = as_equi(&left, &right, predicate) {
                    let lv = self.lower_value(&ExprCtx::over(&left), le)?;
                    let rv = self.lower_value(&ExprCtx::over(&right), re)?;
                    equis.push(EquiCol {
                        left: lv.id,
                        right: rv.id,
                        datatype: lv.datatype,
                        is_semantics,
                    });
                    continue;
                }
            }
            rest.push(predicate);
        }

        let (mut jl, mut jr) = if equis.is_empty() {
            self.cross_pairs(&left, &right)?
        } else {
            match self.index_join(&left, &right, &equis)? {
                Some(pairs) => pairs,
                None => self.releqjoin(&equis)?,
            }
        };

        if !rest.is_empty() {
            let combined = self.pair_relation(&left, &right, jl, jr);
            let mut cand: Option<StmtId> = None;
            for &predicate in &rest {
                cand = Some(self.lower_select(&combined, cand, predicate)?);
            }
            if let Some(cand) = cand {
                jl = self.project(cand, jl, DataType::Int64);
                jr = self.project(cand, jr, DataType::Int64);
            }
        }

        match n.kind {
            JoinKind::Inner => Ok(self.pair_relation(&left, &right, jl, jr)),
            JoinKind::Left => self.outer_complete(&left, &right, jl, jr, true, false),
            JoinKind::Right => self.outer_complete(&left, &right, jl, jr, false, true),
            JoinKind::Full => self.outer_complete(&left, &right, jl, jr, true, true),
            JoinKind::Semi => {
                let head = self.left_head(&left)?;
                let all = self.mirror(head);
                let ids = self.push(
                    StatementOp::Tinter { left: all, right: jl },
                    DataType::Int64,
                    Cardinality::Column,
                );
                Ok(self.projected_relation(&left, ids))
            }
            JoinKind::Anti => {
                let head = self.left_head(&left)?;
                let all = self.mirror(head);
                let ids = self.push(
                    StatementOp::Tdiff { left: all, right: jl },
                    DataType::Int64,
                    Cardinality::Column,
                );
                Ok(self.projected_relation(&left, ids))
            }
            JoinKind::Mark => self.mark_complete(&left, &right, &equis, jl, n.mark_name.as_deref()),
        }
    }

    fn left_head(&self, rel: &RelationStmt) -> Result<StmtId> {
        rel.first_column().map(|c| c.id).ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "join over scalar relation")
        })
    }

    fn cross_pairs(
        &mut self,
        left: &RelationStmt,
        right: &RelationStmt,
    ) -> Result<(StmtId, StmtId)> {
        let lh = self.left_head(left)?;
        let rh = self.left_head(right)?;
        let cross = self.push(
            StatementOp::CrossJoin { left: lh, right: rh },
            DataType::Int64,
            Cardinality::Column,
        );
        let jl = self.nth(cross, 0, DataType::Int64);
        let jr = self.nth(cross, 1, DataType::Int64);
        Ok((jl, jr))
    }

    /// Generic equi-join over one or more column pairs. Multi-column keys
    /// fold into one combined hash, joined null-tolerantly, then every pair
    /// is reverified to drop hash collisions.
    pub(crate) fn releqjoin(&mut self, cols: &[EquiCol]) -> Result<(StmtId, StmtId)> {
        let [single] = cols else {
            return self.hash_join(cols);
        };
        let join = self.push(
            StatementOp::Join {
                left: single.left,
                right: single.right,
                op: CmpOp::Eq,
                is_semantics: single.is_semantics,
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let jl = self.nth(join, 0, DataType::Int64);
        let jr = self.nth(join, 1, DataType::Int64);
        Ok((jl, jr))
    }

    fn hash_join(&mut self, cols: &[EquiCol]) -> Result<(StmtId, StmtId)> {
        if cols.is_empty() {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                "equi-join without key columns",
            ));
        }
        let lh = self.combined_hash(cols.iter().map(|c| c.left), cols.len());
        let rh = self.combined_hash(cols.iter().map(|c| c.right), cols.len());
        let join = self.push(
            StatementOp::Join {
                left: lh,
                right: rh,
                op: CmpOp::Eq,
                is_semantics: true,
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let jl = self.nth(join, 0, DataType::Int64);
        let jr = self.nth(join, 1, DataType::Int64);
        self.verify_pairs(cols, jl, jr)
    }

    /// Fold key columns into a single 64-bit hash column.
    fn combined_hash(
        &mut self,
        cols: impl IntoIterator<Item = StmtId>,
        ncols: usize,
    ) -> StmtId {
        let bits = combined_hash_bits(ncols);
        let mut iter = cols.into_iter();
        let mut acc = match iter.next() {
            Some(first) => self.push(
                StatementOp::Call {
                    func: ScalarFunc::Hash,
                    inputs: vec![first],
                },
                DataType::Int64,
                Cardinality::Column,
            ),
            None => self.lit_i64(0),
        };
        for col in iter {
            acc = self.push(
                StatementOp::Call {
                    func: ScalarFunc::RotateXorHash { bits },
                    inputs: vec![acc, col],
                },
                DataType::Int64,
                Cardinality::Column,
            );
        }
        acc
    }

    /// Reverify candidate pairs column by column, shrinking the pair set.
    fn verify_pairs(
        &mut self,
        cols: &[EquiCol],
        mut jl: StmtId,
        mut jr: StmtId,
    ) -> Result<(StmtId, StmtId)> {
        for col in cols {
            let lvals = self.project(jl, col.left, col.datatype);
            let rvals = self.project(jr, col.right, col.datatype);
            let keep = self.push(
                StatementOp::SelectCmp {
                    input: lvals,
                    op: CmpOp::Eq,
                    value: rvals,
                    value2: None,
                    cand: None,
                    anti: false,
                    is_semantics: col.is_semantics,
                },
                DataType::Int64,
                Cardinality::Column,
            );
            jl = self.project(keep, jl, DataType::Int64);
            jr = self.project(keep, jr, DataType::Int64);
        }
        Ok((jl, jr))
    }

    /// Probe a declared key index with the combined hash of the outer key
    /// columns. Only applies when every inner key column is an unfiltered
    /// base column of one table key carrying an index descriptor; candidate
    /// pairs are still reverified.
    fn index_join(
        &mut self,
        _left: &RelationStmt,
        _right: &RelationStmt,
        cols: &[EquiCol],
    ) -> Result<Option<(StmtId, StmtId)>> {
        if !self.config.use_index_joins {
            return Ok(None);
        }
        let Some((table, key)) = self.index_key_for(cols)? else {
            return Ok(None);
        };

        let probe = self.combined_hash(cols.iter().map(|c| c.left), cols.len());
        let lookup = self.push(
            StatementOp::IndexJoin { probe, table, key },
            DataType::Int64,
            Cardinality::Column,
        );
        let jl = self.nth(lookup, 0, DataType::Int64);
        let jr = self.nth(lookup, 1, DataType::Int64);
        self.verify_pairs(cols, jl, jr).map(Some)
    }

    fn index_key_for(&self, cols: &[EquiCol]) -> Result<Option<(String, String)>> {
        let mut table: Option<String> = None;
        let mut names: Vec<String> = Vec::with_capacity(cols.len());
        for col in cols {
            let stmt = self.graph.get(col.right)?;
            // Inner key columns arrive projected to the table's live rows;
            // anything narrower than the full live set disqualifies the
            // lookup.
            let (col_table, column) = match &stmt.op {
                StatementOp::Project { ids, values } => {
                    let StatementOp::BaseColumn {
                        table: col_table,
                        column,
                    } = &self.graph.get(*values)?.op
                    else {
                        return Ok(None);
                    };
                    let StatementOp::TableIds { table: live_table } = &self.graph.get(*ids)?.op
                    else {
                        return Ok(None);
                    };
                    if live_table != col_table {
                        return Ok(None);
                    }
                    (col_table.clone(), column.clone())
                }
                StatementOp::BaseColumn {
                    table: col_table,
                    column,
                } => (col_table.clone(), column.clone()),
                _ => return Ok(None),
            };
            match &table {
                None => table = Some(col_table),
                Some(t) if *t == col_table => {}
                Some(_) => return Ok(None),
            }
            names.push(column);
        }
        let Some(table) = table else {
            return Ok(None);
        };

        let entry = self.catalog.table(&table)?;
        for key in &entry.keys {
            if key.index.is_none() || key.columns.len() != names.len() {
                continue;
            }
            let key_names: Vec<&str> = key
                .columns
                .iter()
                .map(|&pos| entry.columns[pos].name.as_str())
                .collect();
            let covered = names.iter().all(|n| key_names.contains(&n.as_str()));
            if covered {
                return Ok(Some((table, key.name.clone())));
            }
        }
        Ok(None)
    }

    /// Both sides' columns projected through the matching pair ids.
    fn pair_relation(
        &mut self,
        left: &RelationStmt,
        right: &RelationStmt,
        jl: StmtId,
        jr: StmtId,
    ) -> RelationStmt {
        let mut cols = Vec::with_capacity(left.cols.len() + right.cols.len());
        for col in &left.cols {
            let mut out = col.clone();
            if !out.scalar {
                out.id = self.project(jl, out.id, out.datatype);
            }
            cols.push(out);
        }
        for col in &right.cols {
            let mut out = col.clone();
            if !out.scalar {
                out.id = self.project(jr, out.id, out.datatype);
            }
            cols.push(out);
        }
        RelationStmt::new(cols)
    }

    fn projected_relation(&mut self, rel: &RelationStmt, ids: StmtId) -> RelationStmt {
        let mut cols = rel.cols.clone();
        for col in &mut cols {
            if !col.scalar {
                col.id = self.project(ids, col.id, col.datatype);
            }
        }
        RelationStmt::new(cols)
    }

    /// Complete an outer join: append unmatched rows of the preserved sides,
    /// padding the opposite side with nulls (or zero where the optimizer
    /// marked a countable aggregate).
    fn outer_complete(
        &mut self,
        left: &RelationStmt,
        right: &RelationStmt,
        jl: StmtId,
        jr: StmtId,
        keep_left: bool,
        keep_right: bool,
    ) -> Result<RelationStmt> {
        let un_l = if keep_left {
            let head = self.left_head(left)?;
            let all = self.mirror(head);
            Some(self.push(
                StatementOp::Tdiff { left: all, right: jl },
                DataType::Int64,
                Cardinality::Column,
            ))
        } else {
            None
        };
        let un_r = if keep_right {
            let head = self.left_head(right)?;
            let all = self.mirror(head);
            Some(self.push(
                StatementOp::Tdiff { left: all, right: jr },
                DataType::Int64,
                Cardinality::Column,
            ))
        } else {
            None
        };

        // A padded row has no base position, so row-id columns of a padded
        // side are dropped rather than null-filled.
        let mut cols = Vec::with_capacity(left.cols.len() + right.cols.len());
        for col in &left.cols {
            if un_r.is_some() && col.name == TID_COLUMN {
                continue;
            }
            let mut out = col.clone();
            if !out.scalar {
                let mut id = self.project(jl, out.id, out.datatype);
                if let Some(un) = un_l {
                    let tail = self.project(un, out.id, out.datatype);
                    id = self.append(id, tail, out.datatype);
                }
                if let Some(un) = un_r {
                    let pad = self.pad_column(un, col);
                    id = self.append(id, pad, out.datatype);
                }
                out.id = id;
            }
            cols.push(out);
        }
        for col in &right.cols {
            if un_l.is_some() && col.name == TID_COLUMN {
                continue;
            }
            let mut out = col.clone();
            if !out.scalar {
                let mut id = self.project(jr, out.id, out.datatype);
                if let Some(un) = un_l {
                    let pad = self.pad_column(un, col);
                    id = self.append(id, pad, out.datatype);
                }
                if let Some(un) = un_r {
                    let tail = self.project(un, out.id, out.datatype);
                    id = self.append(id, tail, out.datatype);
                }
                out.id = id;
            }
            cols.push(out);
        }
        Ok(RelationStmt::new(cols))
    }

    fn append(&mut self, left: StmtId, right: StmtId, datatype: DataType) -> StmtId {
        self.push(
            StatementOp::Append { left, right },
            datatype,
            Cardinality::Column,
        )
    }

    fn pad_column(&mut self, head: StmtId, col: &ColumnStmt) -> StmtId {
        let value = if col.outer_zero {
            self.lit(zero_value(col.datatype), col.datatype)
        } else {
            self.null_lit(col.datatype)
        };
        self.push(
            StatementOp::ConstColumn { head, value },
            col.datatype,
            Cardinality::Column,
        )
    }

    /// All left rows plus a three-valued membership mark column.
    fn mark_complete(
        &mut self,
        left: &RelationStmt,
        right: &RelationStmt,
        equis: &[EquiCol],
        jl: StmtId,
        mark_name: Option<&str>,
    ) -> Result<RelationStmt> {
        let head = self.left_head(left)?;
        let f = self.lit_bool(false);
        let mut mark = self.push(
            StatementOp::ConstColumn { head, value: f },
            DataType::Boolean,
            Cardinality::Column,
        );

        let all = self.mirror(head);
        let unmatched = self.push(
            StatementOp::Tdiff { left: all, right: jl },
            DataType::Int64,
            Cardinality::Column,
        );

        // Unmatched probes stay false against an empty inner side, turn
        // unknown when the inner side can hold a null key.
        if !equis.is_empty() {
            let rhead = self.left_head(right)?;
            let rcnt = self.count(rhead);
            let zero = self.lit_i64(0);
            let empty = self.cmp(CmpOp::Eq, rcnt, zero, Cardinality::Scalar);

            let mut r_nil_cnt = self.lit_i64(0);
            for equi in equis {
                let nil = self.null_lit(equi.datatype);
                let nil_ids = self.push(
                    StatementOp::SelectCmp {
                        input: equi.right,
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
                let cnt = self.count(nil_ids);
                r_nil_cnt = self.push(
                    StatementOp::Call {
                        func: ScalarFunc::Add,
                        inputs: vec![r_nil_cnt, cnt],
                    },
                    DataType::Int64,
                    Cardinality::Scalar,
                );
            }
            let r_has_nil = self.cmp(CmpOp::Gt, r_nil_cnt, zero, Cardinality::Scalar);
            let null_bool = self.null_lit(DataType::Boolean);
            let f = self.lit_bool(false);
            let pad = self.push(
                StatementOp::Call {
                    func: ScalarFunc::IfThenElse,
                    inputs: vec![r_has_nil, null_bool, f],
                },
                DataType::Boolean,
                Cardinality::Scalar,
            );
            let pad_col = self.push(
                StatementOp::ConstColumn {
                    head: unmatched,
                    value: pad,
                },
                DataType::Boolean,
                Cardinality::Column,
            );
            mark = self.push(
                StatementOp::Replace {
                    target: mark,
                    ids: unmatched,
                    values: pad_col,
                },
                DataType::Boolean,
                Cardinality::Column,
            );

            // Null probe keys are unknown unless the inner side is empty.
            let mut l_nil: Option<StmtId> = None;
            for equi in equis {
                let nil = self.null_lit(equi.datatype);
                let ids = self.push(
                    StatementOp::SelectCmp {
                        input: equi.left,
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
                l_nil = Some(match l_nil {
                    None => ids,
                    Some(prev) => self.push(
                        StatementOp::Tunion { left: prev, right: ids },
                        DataType::Int64,
                        Cardinality::Column,
                    ),
                });
            }
            if let Some(l_nil) = l_nil {
                let unknown = self.push(
                    StatementOp::Tinter {
                        left: l_nil,
                        right: unmatched,
                    },
                    DataType::Int64,
                    Cardinality::Column,
                );
                let null_bool = self.null_lit(DataType::Boolean);
                let f = self.lit_bool(false);
                let val = self.push(
                    StatementOp::Call {
                        func: ScalarFunc::IfThenElse,
                        inputs: vec![empty, f, null_bool],
                    },
                    DataType::Boolean,
                    Cardinality::Scalar,
                );
                let val_col = self.push(
                    StatementOp::ConstColumn {
                        head: unknown,
                        value: val,
                    },
                    DataType::Boolean,
                    Cardinality::Column,
                );
                mark = self.push(
                    StatementOp::Replace {
                        target: mark,
                        ids: unknown,
                        values: val_col,
                    },
                    DataType::Boolean,
                    Cardinality::Column,
                );
            }
        }

        let t = self.lit_bool(true);
        let t_col = self.push(
            StatementOp::ConstColumn { head: jl, value: t },
            DataType::Boolean,
            Cardinality::Column,
        );
        mark = self.push(
            StatementOp::Replace {
                target: mark,
                ids: jl,
                values: t_col,
            },
            DataType::Boolean,
            Cardinality::Column,
        );

        let mut cols = left.cols.clone();
        let table = left.cols.first().map(|c| c.table.clone()).unwrap_or_default();
        cols.push(ColumnStmt::new(
            mark,
            table,
            mark_name.unwrap_or("mark"),
            DataType::Boolean,
        ));
        Ok(RelationStmt::new(cols))
    }
}
