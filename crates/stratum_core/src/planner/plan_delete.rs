//! DELETE and TRUNCATE compilation: reverse foreign-key enforcement with
//! cascaded deletes, SET NULL/SET DEFAULT fallbacks, and children-first
//! truncation.

use stratum_error::{DbError, DbErrorKind, Result};

use super::plan_join::EquiCol;
use super::plan_update::ColumnUpdate;
use super::{PlanState, RelationStmt};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::catalog::entry::{FkAction, ForeignKeyEntry, TriggerEvent, TriggerTiming};
use crate::plan::expr::CmpOp;
use crate::plan::operator::{Delete, PlanTree, Truncate};
use crate::statements::ops::StatementOp;
use crate::statements::{Cardinality, StmtId};

impl PlanState<'_> {
    pub(crate) fn plan_delete(&mut self, tree: &PlanTree, n: &Delete) -> Result<RelationStmt> {
        let tids = match n.input {
            Some(input) => {
                let rel = self.plan_rel(tree, input)?;
                let rel = self.materialized(rel)?;
                rel.cols
                    .first()
                    .map(|c| c.id)
                    .ok_or_else(|| {
                        DbError::with_kind(DbErrorKind::Semantic, "DELETE: no target row ids")
                    })?
            }
            None => self.push(
                StatementOp::TableIds {
                    table: n.table.clone(),
                },
                DataType::Int64,
                Cardinality::Column,
            ),
        };
        let affected = self.delete_table(&n.table, tids)?;
        self.cascades.clear();
        Ok(self.affected_relation(&n.table, affected))
    }

    /// Delete the rows `tids` of a table with reverse foreign-key handling
    /// and row triggers. Also the target of ON DELETE CASCADE recursion.
    pub(super) fn delete_table(&mut self, table_name: &str, tids: StmtId) -> Result<StmtId> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(DbError::with_kind(
                DbErrorKind::ResourceExhausted,
                "Query too complex: running out of stack space",
            ));
        }
        let result = self.delete_table_inner(table_name, tids);
        self.depth -= 1;
        result
    }

    fn delete_table_inner(&mut self, table_name: &str, tids: StmtId) -> Result<StmtId> {
        let table = self.table_entry(table_name)?;

        let deps: Vec<(String, ForeignKeyEntry)> = self
            .catalog
            .references_to_table(&table.name)
            .map(|(child, fk)| (child.name.clone(), fk.clone()))
            .collect();

        for (child_name, fk) in deps {
            let seen = (child_name.clone(), fk.name.clone());
            if self.cascades.contains(&seen) {
                continue;
            }
            self.cascades.push(seen);

            let child = self.table_entry(&child_name)?;
            let ref_key = table.key(&fk.ref_key)?;
            let child_live = self.push(
                StatementOp::TableIds {
                    table: child.name.clone(),
                },
                DataType::Int64,
                Cardinality::Column,
            );
            let mut equis = Vec::with_capacity(fk.columns.len());
            let mut child_cols = Vec::with_capacity(fk.columns.len());
            for (&child_pos, &key_pos) in fk.columns.iter().zip(&ref_key.columns) {
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
                let parent_col = self.push(
                    StatementOp::BaseColumn {
                        table: table.name.clone(),
                        column: table.columns[key_pos].name.clone(),
                    },
                    entry.datatype,
                    Cardinality::Column,
                );
                let old = self.project(tids, parent_col, entry.datatype);
                equis.push(EquiCol {
                    left: child_col,
                    right: old,
                    datatype: entry.datatype,
                    is_semantics: false,
                });
            }
            let (jl, _) = self.releqjoin(&equis)?;
            // Back to base row positions of the child table.
            let child_tids = self.project(jl, child_live, DataType::Int64);

            match fk.on_delete {
                FkAction::NoAction | FkAction::Restrict => {
                    let cnt = self.count(jl);
                    let zero = self.lit_i64(0);
                    let cond = self.cmp(CmpOp::NotEq, cnt, zero, Cardinality::Scalar);
                    self.assert(
                        cond,
                        DbErrorKind::ConstraintViolation,
                        format!(
                            "DELETE: FOREIGN KEY constraint '{}.{}' violated",
                            child.name, fk.name
                        ),
                    );
                }
                FkAction::Cascade => {
                    self.delete_table(&child.name, child_tids)?;
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

        let old_view = self.table_rows_view(&table, tids);
        self.run_triggers(
            &table,
            TriggerEvent::Delete,
            TriggerTiming::Before,
            Some(&old_view),
            None,
        )?;

        let affected = self.count(tids);
        self.push(
            StatementOp::DeleteRows {
                table: table.name.clone(),
                rows: tids,
            },
            DataType::Int64,
            Cardinality::Column,
        );

        self.run_triggers(
            &table,
            TriggerEvent::Delete,
            TriggerTiming::After,
            Some(&old_view),
            None,
        )?;

        Ok(affected)
    }

    /// TRUNCATE empties whole tables without row triggers. CASCADE clears
    /// every transitively referencing table first; otherwise referencing
    /// tables must hold no live references, checked at runtime.
    pub(crate) fn plan_truncate(&mut self, n: &Truncate) -> Result<RelationStmt> {
        let table = self.table_entry(&n.table)?;
        let all = self.push(
            StatementOp::TableIds {
                table: table.name.clone(),
            },
            DataType::Int64,
            Cardinality::Column,
        );
        let affected = self.count(all);

        if n.cascade {
            let mut visited = Vec::new();
            let mut order = Vec::new();
            self.truncate_closure(&table.name, &mut visited, &mut order, 0)?;
            for name in order {
                self.push(
                    StatementOp::ClearTable { table: name },
                    DataType::Int64,
                    Cardinality::Scalar,
                );
            }
        } else {
            let deps: Vec<(String, ForeignKeyEntry)> = self
                .catalog
                .references_to_table(&table.name)
                .map(|(child, fk)| (child.name.clone(), fk.clone()))
                .collect();
            for (child_name, fk) in deps {
                if child_name == table.name {
                    continue;
                }
                let child = self.table_entry(&child_name)?;
                let child_live = self.push(
                    StatementOp::TableIds {
                        table: child.name.clone(),
                    },
                    DataType::Int64,
                    Cardinality::Column,
                );
                let cols: Vec<(StmtId, DataType)> = fk
                    .columns
                    .iter()
                    .map(|&pos| {
                        let entry = &child.columns[pos];
                        let id = self.push(
                            StatementOp::BaseColumn {
                                table: child.name.clone(),
                                column: entry.name.clone(),
                            },
                            entry.datatype,
                            Cardinality::Column,
                        );
                        (id, entry.datatype)
                    })
                    .collect();
                let Some(referencing) = self.nonnil_chain(cols, Some(child_live)) else {
                    continue;
                };
                let cnt = self.count(referencing);
                let zero = self.lit_i64(0);
                let cond = self.cmp(CmpOp::NotEq, cnt, zero, Cardinality::Scalar);
                self.assert(
                    cond,
                    DbErrorKind::ConstraintViolation,
                    format!(
                        "TRUNCATE: FOREIGN KEY constraint '{}.{}' violated",
                        child.name, fk.name
                    ),
                );
            }
            self.push(
                StatementOp::ClearTable {
                    table: table.name.clone(),
                },
                DataType::Int64,
                Cardinality::Scalar,
            );
        }

        Ok(self.affected_relation(&table.name, affected))
    }

    /// Referencing tables before referenced ones, each at most once.
    fn truncate_closure(
        &self,
        name: &str,
        visited: &mut Vec<String>,
        order: &mut Vec<String>,
        depth: usize,
    ) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(DbError::with_kind(
                DbErrorKind::ResourceExhausted,
                "Query too complex: running out of stack space",
            ));
        }
        if visited.iter().any(|t| t == name) {
            return Ok(());
        }
        visited.push(name.to_string());
        let children: Vec<String> = self
            .catalog
            .references_to_table(name)
            .map(|(child, _)| child.name.clone())
            .filter(|child| child != name)
            .collect();
        for child in children {
            self.truncate_closure(&child, visited, order, depth + 1)?;
        }
        order.push(name.to_string());
        Ok(())
    }
}
