//! Table metadata consumed by the compiler: typed nullable columns, key and
//! foreign-key constraints, triggers. Produced by an external catalog layer
//! and read-only here.

pub mod entry;

use hashbrown::HashMap;
use stratum_error::{DbError, DbErrorKind, Result};

use self::entry::{ForeignKeyEntry, KeyEntry, TableEntry};

/// Lookup structure over table entries.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: Vec<TableEntry>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableEntry) {
        self.by_name.insert(table.name.clone(), self.tables.len());
        self.tables.push(table);
    }

    pub fn table(&self, name: &str) -> Result<&TableEntry> {
        self.by_name
            .get(name)
            .map(|&idx| &self.tables[idx])
            .ok_or_else(|| {
                DbError::with_kind(DbErrorKind::Unresolved, format!("unresolved table '{name}'"))
            })
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableEntry> {
        self.tables.iter()
    }

    /// Foreign keys anywhere in the catalog that reference the given key,
    /// paired with their owning (child) table.
    pub fn dependent_foreign_keys<'a>(
        &'a self,
        table: &'a str,
        key: &'a KeyEntry,
    ) -> impl Iterator<Item = (&'a TableEntry, &'a ForeignKeyEntry)> {
        self.tables.iter().flat_map(move |child| {
            child
                .foreign_keys
                .iter()
                .filter(move |fk| fk.ref_table == table && fk.ref_key == key.name)
                .map(move |fk| (child, fk))
        })
    }

    /// Foreign keys referencing any key of the given table.
    pub fn references_to_table<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a TableEntry, &'a ForeignKeyEntry)> {
        self.tables.iter().flat_map(move |child| {
            child
                .foreign_keys
                .iter()
                .filter(move |fk| fk.ref_table == table)
                .map(move |fk| (child, fk))
        })
    }
}
