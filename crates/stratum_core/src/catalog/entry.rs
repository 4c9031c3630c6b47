use stratum_error::{DbError, DbErrorKind, Result};

use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::plan::operator::PlanTree;

#[derive(Debug, Clone)]
pub struct ColumnEntry {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    /// Value used for SET DEFAULT cascades and defaulted inserts.
    pub default: Option<ScalarValue>,
}

impl ColumnEntry {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        ColumnEntry {
            name: name.into(),
            datatype,
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, value: ScalarValue) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Primary,
    Unique,
}

impl KeyKind {
    pub const fn constraint_name(&self) -> &'static str {
        match self {
            KeyKind::Primary => "PRIMARY KEY",
            KeyKind::Unique => "UNIQUE",
        }
    }
}

/// Descriptor of a secondary access structure attached to a key. Presence
/// enables index-accelerated lookups; lookups fall back to the generic path
/// when absent.
#[derive(Debug, Clone)]
pub struct IndexDesc {
    pub name: String,
}

/// Primary or unique key over ordered column positions.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub name: String,
    pub kind: KeyKind,
    pub columns: Vec<usize>,
    pub index: Option<IndexDesc>,
}

/// Referential action declared on a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone)]
pub struct ForeignKeyEntry {
    pub name: String,
    /// Column positions in the owning (child) table.
    pub columns: Vec<usize>,
    pub ref_table: String,
    pub ref_key: String,
    pub on_update: FkAction,
    pub on_delete: FkAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

/// A row trigger. The body is a plan tree compiled inline with the OLD/NEW
/// row sets registered under the declared aliases.
#[derive(Debug, Clone)]
pub struct TriggerEntry {
    pub name: String,
    pub event: TriggerEvent,
    pub timing: TriggerTiming,
    pub old_alias: Option<String>,
    pub new_alias: Option<String>,
    pub body: PlanTree,
}

#[derive(Debug, Clone, Default)]
pub struct TableEntry {
    pub name: String,
    pub columns: Vec<ColumnEntry>,
    pub keys: Vec<KeyEntry>,
    pub foreign_keys: Vec<ForeignKeyEntry>,
    pub triggers: Vec<TriggerEntry>,
}

impl TableEntry {
    pub fn new(name: impl Into<String>) -> Self {
        TableEntry {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                DbError::with_kind(
                    DbErrorKind::Unresolved,
                    format!("unresolved column '{}.{}'", self.name, name),
                )
            })
    }

    pub fn column(&self, name: &str) -> Result<&ColumnEntry> {
        Ok(&self.columns[self.column_position(name)?])
    }

    pub fn key(&self, name: &str) -> Result<&KeyEntry> {
        self.keys.iter().find(|k| k.name == name).ok_or_else(|| {
            DbError::with_kind(
                DbErrorKind::Unresolved,
                format!("unresolved key '{}.{}'", self.name, name),
            )
        })
    }

    pub fn primary_key(&self) -> Option<&KeyEntry> {
        self.keys.iter().find(|k| k.kind == KeyKind::Primary)
    }

    /// Position of the cheapest column, used when counting rows without
    /// caring about any particular value.
    pub fn smallest_column(&self) -> usize {
        let mut best = 0;
        for (idx, col) in self.columns.iter().enumerate() {
            if col.datatype.value_width() < self.columns[best].datatype.value_width() {
                best = idx;
            }
        }
        best
    }

    pub fn triggers_for(
        &self,
        event: TriggerEvent,
        timing: TriggerTiming,
    ) -> impl Iterator<Item = &TriggerEntry> {
        self.triggers
            .iter()
            .filter(move |t| t.event == event && t.timing == timing)
    }
}
