//! Minimal in-memory column store backing the reference interpreter.
//!
//! Row positions are stable: deletion only clears the liveness flag, so
//! previously handed-out positions keep addressing the same row.

use hashbrown::HashMap;
use stratum_error::{DbError, Result};

use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, Default)]
pub struct TableData {
    /// One value vector per catalog column, all the same length.
    pub columns: Vec<Vec<ScalarValue>>,
    pub live: Vec<bool>,
}

impl TableData {
    pub fn from_rows(ncols: usize, rows: Vec<Vec<ScalarValue>>) -> Self {
        let mut columns = vec![Vec::with_capacity(rows.len()); ncols];
        let live = vec![true; rows.len()];
        for row in rows {
            assert_eq!(row.len(), ncols, "row width mismatch");
            for (col, value) in columns.iter_mut().zip(row) {
                col.push(value);
            }
        }
        TableData { columns, live }
    }

    pub fn live_positions(&self) -> Vec<usize> {
        self.live
            .iter()
            .enumerate()
            .filter_map(|(pos, &live)| live.then_some(pos))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|&&l| l).count()
    }

    /// Reserve `count` fresh row positions, initialized to null.
    pub fn claim(&mut self, count: usize) -> Vec<usize> {
        let start = self.live.len();
        for col in &mut self.columns {
            col.resize(start + count, ScalarValue::Null);
        }
        self.live.resize(start + count, true);
        (start..start + count).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestDb {
    tables: HashMap<String, TableData>,
}

impl TestDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &mut self,
        name: impl Into<String>,
        ncols: usize,
        rows: Vec<Vec<ScalarValue>>,
    ) {
        self.tables
            .insert(name.into(), TableData::from_rows(ncols, rows));
    }

    pub fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::new(format!("no stored table '{name}'")))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::new(format!("no stored table '{name}'")))
    }

    /// Live rows of a table in position order, for assertions.
    pub fn rows(&self, name: &str) -> Result<Vec<Vec<ScalarValue>>> {
        let table = self.table(name)?;
        Ok(table
            .live_positions()
            .into_iter()
            .map(|pos| table.columns.iter().map(|c| c[pos].clone()).collect())
            .collect())
    }
}
