//! INSERT compilation: per-column appends guarded by NOT NULL, key and
//! foreign-key checks and wrapped in row triggers.
//!
//! Key uniqueness is enforced in two phases: the new rows against the stored
//! rows with an equi-join, and the new rows against each other with grouping
//! (single column) or sorting (multi column). Both run before any mutation
//! statement is emitted.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_join::EquiCol;
use super::{ColumnStmt, PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::catalog::entry::{
    ForeignKeyEntry,
    KeyEntry,
    KeyKind,
    TableEntry,
    TriggerEvent,
    TriggerTiming,
};
use crate::plan::expr::{AggrFunc, CmpOp};
use crate::plan::operator::{Insert, PlanTree};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

impl PlanState<'_> {
    pub(crate) fn plan_insert(&mut self, tree: &PlanTree, n: &Insert) -> Result<RelationStmt> {
        let table = self.table_entry(&n.table)?;
        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;
        if input.cols.len() != table.columns.len() {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                format!(
                    "INSERT INTO: {} columns provided, table '{}' has {}",
                    input.cols.len(),
                    table.name,
                    table.columns.len()
                ),
            ));
        }
        let input = self.rows_relation(input);

        for (entry, col) in table.columns.iter().zip(&input.cols) {
            if entry.nullable {
                continue;
            }
            self.not_null_assert(
                col.id,
                entry.datatype,
                format!(
                    "INSERT INTO: NOT NULL constraint violated for column '{}.{}'",
                    table.name, entry.name
                ),
            );
        }

        let values: Vec<(StmtId, DataType)> =
            input.cols.iter().map(|c| (c.id, c.datatype)).collect();
        for key in &table.keys {
            self.key_checks(&table, key, &values, "INSERT INTO", None)?;
        }
        for fk in &table.foreign_keys {
            self.fk_existence_check(&table, fk, &values, "INSERT INTO")?;
        }

        let new_view = self.insert_view(&table, &input);
        self.run_triggers(
            &table,
            TriggerEvent::Insert,
            TriggerTiming::Before,
            None,
            Some(&new_view),
        )?;

        let head = input.first_column().map(|c| c.id).ok_or_else(|| {
            DbError::with_kind(DbErrorKind::Semantic, "INSERT INTO: empty value list")
        })?;
        let affected = self.count(head);
        let positions = self.push(
            StatementOp::Claim {
                table: table.name.clone(),
                count: affected,
            },
            DataType::Int64,
            Cardinality::Column,
        );
        for (entry, col) in table.columns.iter().zip(&input.cols) {
            self.push(
                StatementOp::AppendCol {
                    table: table.name.clone(),
                    column: entry.name.clone(),
                    positions,
                    values: col.id,
                },
                entry.datatype,
                Cardinality::Column,
            );
        }

        self.run_triggers(
            &table,
            TriggerEvent::Insert,
            TriggerTiming::After,
            None,
            Some(&new_view),
        )?;

        self.cascades.clear();
        Ok(self.affected_relation(&table.name, affected))
    }

    /// New-row view exposed to insert triggers under the trigger's NEW alias.
    fn insert_view(&self, table: &TableEntry, input: &RelationStmt) -> RelationStmt {
        let cols = table
            .columns
            .iter()
            .zip(&input.cols)
            .map(|(entry, col)| ColumnStmt::new(col.id, &table.name, &entry.name, entry.datatype))
            .collect();
        RelationStmt::new(cols)
    }

    // --- helpers shared by all DML forms ---

    /// Guarantee at least one row-valued column; a fully scalar value list is
    /// one row.
    pub(super) fn rows_relation(&mut self, mut rel: RelationStmt) -> RelationStmt {
        if rel.first_column().is_some() {
            return rel;
        }
        let unit = self.push(
            StatementOp::ValueList {
                values: vec![ScalarValue::Int64(0)],
            },
            DataType::Int64,
            Cardinality::Column,
        );
        for col in &mut rel.cols {
            col.id = self.push(
                StatementOp::ConstColumn {
                    head: unit,
                    value: col.id,
                },
                col.datatype,
                Cardinality::Column,
            );
            col.scalar = false;
        }
        rel.reindex();
        rel
    }

    /// Scalar "affected rows" result of a DML statement.
    pub(super) fn affected_relation(&mut self, table: &str, count: StmtId) -> RelationStmt {
        let mut col = ColumnStmt::new(count, table, "affected", DataType::Int64);
        col.scalar = true;
        RelationStmt::new(vec![col])
    }

    /// Assert that a value column holds no nulls.
    pub(super) fn not_null_assert(&mut self, col: StmtId, datatype: DataType, message: String) {
        let nil = self.null_lit(datatype);
        let nil_rows = self.push(
            StatementOp::SelectCmp {
                input: col,
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
        let cnt = self.count(nil_rows);
        let zero = self.lit_i64(0);
        let cond = self.cmp(CmpOp::NotEq, cnt, zero, Cardinality::Scalar);
        self.assert(cond, DbErrorKind::ConstraintViolation, message);
    }

    /// Shrinking chain of null-rejecting selects over the given columns.
    pub(super) fn nonnil_chain(
        &mut self,
        cols: impl IntoIterator<Item = (StmtId, DataType)>,
        start: Option<StmtId>,
    ) -> Option<StmtId> {
        let mut cand = start;
        for (col, datatype) in cols {
            let nil = self.null_lit(datatype);
            cand = Some(self.push(
                StatementOp::SelectCmp {
                    input: col,
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
        cand
    }

    pub(super) fn applied(&mut self, cand: Option<StmtId>, col: StmtId, datatype: DataType) -> StmtId {
        match cand {
            Some(cand) => self.project(cand, col, datatype),
            None => col,
        }
    }

    /// Both uniqueness phases for one key over candidate row values aligned
    /// with the table's column order. `exclude` removes stored rows from the
    /// comparison set (the rows being updated).
    pub(super) fn key_checks(
        &mut self,
        table: &TableEntry,
        key: &KeyEntry,
        values: &[(StmtId, DataType)],
        action: &str,
        exclude: Option<StmtId>,
    ) -> Result<()> {
        let message = format!(
            "{action}: {} constraint '{}.{}' violated",
            key.kind.constraint_name(),
            table.name,
            key.name
        );

        // Unique keys ignore rows with a null key part.
        let cand = if key.kind == KeyKind::Unique {
            self.nonnil_chain(key.columns.iter().map(|&pos| values[pos]), None)
        } else {
            None
        };
        let vals: Vec<(StmtId, DataType)> = key
            .columns
            .iter()
            .map(|&pos| {
                let (id, datatype) = values[pos];
                (self.applied(cand, id, datatype), datatype)
            })
            .collect();

        // Phase one: against the stored live rows.
        let all = self.push(
            StatementOp::TableIds {
                table: table.name.clone(),
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let stored = match exclude {
            Some(tids) => self.push(
                StatementOp::Tdiff {
                    left: all,
                    right: tids,
                },
                DataType::Int64,
                Cardinality::Column,
            ),
            None => all,
        };
        let mut equis = Vec::with_capacity(vals.len());
        for (&pos, &(left, datatype)) in key.columns.iter().zip(&vals) {
            let base = self.push(
                StatementOp::BaseColumn {
                    table: table.name.clone(),
                    column: table.columns[pos].name.clone(),
                },
                datatype,
                Cardinality::Column,
            );
            let right = self.project(stored, base, datatype);
            equis.push(EquiCol {
                left,
                right,
                datatype,
                is_semantics: false,
            });
        }
        let (jl, _) = self.releqjoin(&equis)?;
        let cnt = self.count(jl);
        let zero = self.lit_i64(0);
        let cond = self.cmp(CmpOp::NotEq, cnt, zero, Cardinality::Scalar);
        self.assert(cond, DbErrorKind::ConstraintViolation, message.clone());

        // Phase two: within the batch itself.
        self.batch_unique_assert(&vals, message)
    }

    fn batch_unique_assert(
        &mut self,
        vals: &[(StmtId, DataType)],
        message: String,
    ) -> Result<()> {
        match vals {
            [] => Ok(()),
            [(col, _)] => {
                let Some(grp) = self.group_columns(&[*col])? else {
                    return Ok(());
                };
                let ngroups = self.count(grp.extent);
                let nrows = self.count(*col);
                let cond = self.cmp(CmpOp::NotEq, ngroups, nrows, Cardinality::Scalar);
                self.assert(cond, DbErrorKind::ConstraintViolation, message);
                Ok(())
            }
            many => {
                // Sort on all key parts; a populated tie group is a
                // duplicate.
                let mut ids: Option<StmtId> = None;
                let mut groups: Option<StmtId> = None;
                for &(col, _) in many {
                    let ord = self.push(
                        StatementOp::Order {
                            input: col,
                            prev_ids: ids,
                            prev_groups: groups,
                            desc: false,
                            nulls_last: false,
                        },
                        DataType::Int64,
                        Cardinality::Column,
                    );
                    ids = Some(self.nth(ord, 1, DataType::Int64));
                    groups = Some(self.nth(ord, 2, DataType::Int64));
                }
                let Some(groups) = groups else {
                    return Ok(());
                };
                let cond = self.push(
                    StatementOp::Aggregate {
                        func: AggrFunc::NotUnique,
                        input: Some(groups),
                        groups: None,
                        extent: None,
                        skip_nils: false,
                    },
                    DataType::Boolean,
                    Cardinality::Scalar,
                );
                self.assert(cond, DbErrorKind::ConstraintViolation, message);
                Ok(())
            }
        }
    }

    /// MATCH SIMPLE foreign-key existence: rows with any null key part are
    /// exempt, every other row must find its referenced key.
    pub(super) fn fk_existence_check(
        &mut self,
        table: &TableEntry,
        fk: &ForeignKeyEntry,
        values: &[(StmtId, DataType)],
        action: &str,
    ) -> Result<()> {
        let Some(cand) = self.nonnil_chain(fk.columns.iter().map(|&pos| values[pos]), None)
        else {
            return Ok(());
        };

        let parent = self.table_entry(&fk.ref_table)?;
        let ref_key = parent.key(&fk.ref_key)?.clone();
        let parent_live = self.push(
            StatementOp::TableIds {
                table: parent.name.clone(),
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let mut equis = Vec::with_capacity(fk.columns.len());
        for (&pos, &ref_pos) in fk.columns.iter().zip(&ref_key.columns) {
            let (id, datatype) = values[pos];
            let left = self.applied(Some(cand), id, datatype);
            let base = self.push(
                StatementOp::BaseColumn {
                    table: parent.name.clone(),
                    column: parent.columns[ref_pos].name.clone(),
                },
                datatype,
                Cardinality::Column,
            );
            let right = self.project(parent_live, base, datatype);
            equis.push(EquiCol {
                left,
                right,
                datatype,
                is_semantics: false,
            });
        }
        let (jl, _) = self.releqjoin(&equis)?;
        let matched = self.count(jl);
        let expected = self.count(cand);
        self.assert_counts_equal(
            matched,
            expected,
            DbErrorKind::ConstraintViolation,
            format!(
                "{action}: FOREIGN KEY constraint '{}.{}' violated",
                table.name, fk.name
            ),
        );
        Ok(())
    }

    /// Compile every matching row trigger's body inline with the OLD/NEW
    /// views in scope.
    pub(super) fn run_triggers(
        &mut self,
        table: &TableEntry,
        event: TriggerEvent,
        timing: TriggerTiming,
        old_view: Option<&RelationStmt>,
        new_view: Option<&RelationStmt>,
    ) -> Result<()> {
        let triggers: Vec<_> = table.triggers_for(event, timing).cloned().collect();
        for trigger in triggers {
            let mut views = Vec::new();
            if let (Some(alias), Some(view)) = (&trigger.old_alias, old_view) {
                views.push((alias.clone(), view.clone()));
            }
            if let (Some(alias), Some(view)) = (&trigger.new_alias, new_view) {
                views.push((alias.clone(), view.clone()));
            }
            self.plan_subtree(&trigger.body, views)?;
        }
        Ok(())
    }
}
