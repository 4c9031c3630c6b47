//! UPDATE compilation, including forward constraint checks on the new values
//! and reverse cascades into referencing tables.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_join::EquiCol;
use super::{ColumnStmt, PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::catalog::entry::{
    FkAction,
    ForeignKeyEntry,
    KeyEntry,
    TableEntry,
    TriggerEvent,
    TriggerTiming,
};
use crate::plan::expr::CmpOp;
use crate::plan::operator::{PlanTree, Update};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

/// One column assignment of an update, aligned with the target row ids or
/// scalar (broadcast).
#[derive(Debug, Clone)]
pub(super) struct ColumnUpdate {
    pub column: String,
    pub value: StmtId,
    pub scalar: bool,
    pub datatype: DataType,
}

impl PlanState<'_> {
    pub(crate) fn plan_update(&mut self, tree: &PlanTree, n: &Update) -> Result<RelationStmt> {
        let input = self.plan_rel(tree, n.input)?;
        let input = self.materialized(input)?;
        if input.cols.len() != n.columns.len() + 1 {
            return Err(DbError::with_kind(
                DbErrorKind::Semantic,
                format!(
                    "UPDATE: {} value columns for {} target columns",
                    input.cols.len().saturating_sub(1),
                    n.columns.len()
                ),
            ));
        }
        let tids = input.cols[0].id;
        let updates: Vec<ColumnUpdate> = n
            .columns
            .iter()
            .zip(&input.cols[1..])
            .map(|(name, col)| ColumnUpdate {
                column: name.clone(),
                value: col.id,
                scalar: col.scalar,
                datatype: col.datatype,
            })
            .collect();

        let affected = self.update_table(&n.table, tids, updates)?;
        self.cascades.clear();
        Ok(self.affected_relation(&n.table, affected))
    }

    /// Apply column assignments to the rows `tids` of a table, with all
    /// constraint enforcement, reverse cascades and triggers. Also the entry
    /// point for ON UPDATE and ON DELETE SET NULL/SET DEFAULT cascades.
    pub(super) fn update_table(
        &mut self,
        table_name: &str,
        tids: StmtId,
        updates: Vec<ColumnUpdate>,
    ) -> Result<StmtId> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(DbError::with_kind(
                DbErrorKind::ResourceExhausted,
                "Query too complex: running out of stack space",
            ));
        }
        let result = self.update_table_inner(table_name, tids, updates);
        self.depth -= 1;
        result
    }

    fn update_table_inner(
        &mut self,
        table_name: &str,
        tids: StmtId,
        updates: Vec<ColumnUpdate>,
    ) -> Result<StmtId> {
        let table = self.table_entry(table_name)?;

        // Broadcast scalar assignments over the target rows.
        let updates: Vec<ColumnUpdate> = updates
            .into_iter()
            .map(|mut u| {
                if u.scalar {
                    u.value = self.push(
                        StatementOp::ConstColumn {
                            head: tids,
                            value: u.value,
                        },
                        u.datatype,
                        Cardinality::Column,
                    );
                    u.scalar = false;
                }
                u
            })
            .collect();

        for u in &updates {
            let entry = table.column(&u.column)?;
            if !entry.nullable {
                self.not_null_assert(
                    u.value,
                    u.datatype,
                    format!(
                        "UPDATE: NOT NULL constraint violated for column '{}.{}'",
                        table.name, entry.name
                    ),
                );
            }
        }

        // Updated-or-current value of every table column, aligned with tids.
        let updated_pos: Vec<usize> = updates
            .iter()
            .map(|u| table.column_position(&u.column))
            .collect::<Result<_>>()?;
        let mut values: Vec<(StmtId, DataType)> = Vec::with_capacity(table.columns.len());
        for (pos, entry) in table.columns.iter().enumerate() {
            match updated_pos.iter().position(|&p| p == pos) {
                Some(idx) => values.push((updates[idx].value, entry.datatype)),
                None => {
                    let base = self.push(
                        StatementOp::BaseColumn {
                            table: table.name.clone(),
                            column: entry.name.clone(),
                        },
                        entry.datatype,
                        Cardinality::Column,
                    );
                    values.push((self.project(tids, base, entry.datatype), entry.datatype));
                }
            }
        }

        // Stored values of the updated columns, captured before any mutation
        // statement so cascades can still match the old key.
        let mut old_values = values.clone();
        for &pos in &updated_pos {
            let entry = &table.columns[pos];
            let base = self.push(
                StatementOp::BaseColumn {
                    table: table.name.clone(),
                    column: entry.name.clone(),
                },
                entry.datatype,
                Cardinality::Column,
            );
            old_values[pos] = (self.project(tids, base, entry.datatype), entry.datatype);
        }

        let touches = |cols: &[usize]| cols.iter().any(|pos| updated_pos.contains(pos));

        let keys: Vec<_> = table
            .keys
            .iter()
            .filter(|k| touches(&k.columns))
            .cloned()
            .collect();
        for key in &keys {
            self.key_checks(&table, key, &values, "UPDATE", Some(tids))?;
        }
        let fks: Vec<_> = table
            .foreign_keys
            .iter()
            .filter(|fk| touches(&fk.columns))
            .cloned()
            .collect();
        for fk in &fks {
            self.fk_existence_check(&table, fk, &values, "UPDATE")?;
        }

        let old_view = self.table_rows_view(&table, tids);
        let new_view = self.updated_rows_view(&table, &values);
        self.run_triggers(
            &table,
            TriggerEvent::Update,
            TriggerTiming::Before,
            Some(&old_view),
            Some(&new_view),
        )?;

        for u in &updates {
            self.push(
                StatementOp::UpdateCol {
                    table: table.name.clone(),
                    column: u.column.clone(),
                    rows: tids,
                    values: u.value,
                },
                u.datatype,
                Cardinality::Column,
            );
        }

        // Cascades run against the already-updated parent, so a cascaded
        // child's own foreign-key check sees the new parent key.
        for key in &keys {
            self.cascade_key_update(&table, key, &old_values, &values)?;
        }

        self.run_triggers(
            &table,
            TriggerEvent::Update,
            TriggerTiming::After,
            Some(&old_view),
            Some(&new_view),
        )?;

        Ok(self.count(tids))
    }

    /// Propagate a key change into every referencing table per its declared
    /// ON UPDATE action. Each foreign key cascades at most once per top-level
    /// statement, which breaks referential cycles.
    fn cascade_key_update(
        &mut self,
        table: &TableEntry,
        key: &KeyEntry,
        old_values: &[(StmtId, DataType)],
        values: &[(StmtId, DataType)],
    ) -> Result<()> {
        let deps: Vec<(String, ForeignKeyEntry)> = self
            .catalog
            .dependent_foreign_keys(&table.name, key)
            .map(|(child, fk)| (child.name.clone(), fk.clone()))
            .collect();

        for (child_name, fk) in deps {
            let seen = (child_name.clone(), fk.name.clone());
            if self.cascades.contains(&seen) {
                continue;
            }
            self.cascades.push(seen);

            let child = self.table_entry(&child_name)?;
            let child_live = self.push(
                StatementOp::TableIds {
                    table: child.name.clone(),
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let mut equis = Vec::with_capacity(key.columns.len());
            let mut child_cols = Vec::with_capacity(fk.columns.len());
            for (&child_pos, &key_pos) in fk.columns.iter().zip(&key.columns) {
                let entry = &child.columns[child_pos];
                let base = self.push(
                    StatementOp::BaseColumn {
                        table: child.name.clone(),
                        column: entry.name.clone(),
                    },
                    entry.datatype,
                    Cardinality::Column,
                );
                let child_col = self.project(child_live, base, entry.datatype);
                child_cols.push((child_pos, entry.datatype));
                let (old, _) = old_values[key_pos];
                equis.push(EquiCol {
                    left: child_col,
                    right: old,
                    datatype: entry.datatype,
                    is_semantics: false,
                });
            }
            let (jl, jr) = self.releqjoin(&equis)?;
            // Back to base row positions of the child table.
            let child_tids = self.project(jl, child_live, DataType::Int64);

            match fk.on_update {
                FkAction::NoAction | FkAction::Restrict => {
                    let cnt = self.count(jl);
                    let zero = self.lit_i64(0);
                    let cond = self.cmp(CmpOp::NotEq, cnt, zero, Cardinality::Scalar);
                    self.assert(
                        cond,
                        DbErrorKind::ConstraintViolation,
                        format!(
                            "UPDATE: FOREIGN KEY constraint '{}.{}' violated",
                            child.name, fk.name
                        ),
                    );
                }
                FkAction::Cascade => {
                    let child_updates = fk
                        .columns
                        .iter()
                        .zip(&key.columns)
                        .map(|(&child_pos, &key_pos)| {
                            let (new_val, datatype) = values[key_pos];
                            ColumnUpdate {
                                column: child.columns[child_pos].name.clone(),
                                value: self.project(jr, new_val, datatype),
                                scalar: false,
                                datatype,
                            }
                        })
                        .collect();
                    self.update_table(&child.name, child_tids, child_updates)?;
                }
                FkAction::SetNull => {
                    let child_updates = child_cols
                        .iter()
                        .map(|&(pos, datatype)| ColumnUpdate {
                            column: child.columns[pos].name.clone(),
                            value: self.null_lit(datatype),
                            scalar: true,
                            datatype,
                        })
                        .collect();
                    self.update_table(&child.name, child_tids, child_updates)?;
                }
                FkAction::SetDefault => {
                    let child_updates = child_cols
                        .iter()
                        .map(|&(pos, datatype)| {
                            let entry = &child.columns[pos];
                            let value = entry.default.clone().unwrap_or(ScalarValue::Null);
                            ColumnUpdate {
                                column: entry.name.clone(),
                                value: self.lit(value, datatype),
                                scalar: true,
                                datatype,
                            }
                        })
                        .collect();
                    self.update_table(&child.name, child_tids, child_updates)?;
                }
            }
        }
        Ok(())
    }

    /// Current row values of `tids`, used as the OLD trigger view.
    pub(super) fn table_rows_view(&mut self, table: &TableEntry, tids: StmtId) -> RelationStmt {
        let mut cols = Vec::with_capacity(table.columns.len());
        for entry in &table.columns {
            let base = self.push(
                StatementOp::BaseColumn {
                    table: table.name.clone(),
                    column: entry.name.clone(),
                },
                entry.datatype,
                Cardinality::Column,
            );
            let id = self.project(tids, base, entry.datatype);
            cols.push(ColumnStmt::new(id, &table.name, &entry.name, entry.datatype));
        }
        RelationStmt::new(cols)
    }

    fn updated_rows_view(
        &self,
        table: &TableEntry,
        values: &[(StmtId, DataType)],
    ) -> RelationStmt {
        let cols = table
            .columns
            .iter()
            .zip(values)
            .map(|(entry, &(id, _))| ColumnStmt::new(id, &table.name, &entry.name, entry.datatype))
            .collect();
        RelationStmt::new(cols)
    }
}
