use stratum_error::DbErrorKind;

use super::StmtId;
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::plan::expr::{AggrFunc, CmpOp, ScalarFunc};

/// Payload of a compiled-in runtime assertion. The executor raises an error
/// of `kind` with `message` when the condition evaluates to true.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertError {
    pub kind: DbErrorKind,
    pub message: String,
}

/// Operation tag plus operand references of a statement.
///
/// Conventions shared with the executor:
/// - "ids" operands/results are row-position sequences (candidate sets);
///   "values" are data columns. A candidate's domain is the positions of the
///   column it restricts.
/// - Multi-output operations ([`StatementOp::Join`], [`StatementOp::Group`],
///   [`StatementOp::Order`], partial [`StatementOp::Limit`]) expose their
///   outputs through [`StatementOp::NthResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOp {
    /// A single constant value.
    Literal { value: ScalarValue },
    /// A materialized list of constants.
    ValueList { values: Vec<ScalarValue> },
    /// Full column of a base table, aligned with row positions.
    BaseColumn { table: String, column: String },
    /// All live row positions of a base table.
    TableIds { table: String },
    /// `value` repeated once per row of `head`.
    ConstColumn { head: StmtId, value: StmtId },
    /// Positions `0..len(input)`.
    Mirror { input: StmtId },
    /// `values[ids[i]]` for each i; projection of a column through a
    /// candidate.
    Project { ids: StmtId, values: StmtId },
    /// Concatenation, left then right.
    Append { left: StmtId, right: StmtId },
    /// Copy of `target` with `target[ids[i]] = values[i]`; positional
    /// scatter used by branch accumulation.
    Replace {
        target: StmtId,
        ids: StmtId,
        values: StmtId,
    },
    /// `extent[i]` repeated `counts[i]` times; replicates one representative
    /// row position per group into the group's cardinality.
    Expand { extent: StmtId, counts: StmtId },

    /// Filtering select over `input` restricted to `cand`, yielding the
    /// subset of the candidate domain whose value passes the comparison.
    /// `value2` turns the test into a range. `is_semantics` makes equality
    /// null-tolerant, `anti` negates.
    SelectCmp {
        input: StmtId,
        op: CmpOp,
        value: StmtId,
        value2: Option<StmtId>,
        cand: Option<StmtId>,
        anti: bool,
        is_semantics: bool,
    },

    /// Comparison join of two value columns; outputs a pair of matching
    /// position columns (0 = left, 1 = right).
    Join {
        left: StmtId,
        right: StmtId,
        op: CmpOp,
        is_semantics: bool,
    },
    /// Every (left, right) position pair.
    CrossJoin { left: StmtId, right: StmtId },
    /// Probe a key's index with precomputed hash values; outputs probe
    /// positions and positions into the table's live row sequence. May
    /// return false positives, callers verify.
    IndexJoin {
        probe: StmtId,
        table: String,
        key: String,
    },
    /// `index`th output of a multi-output statement.
    NthResult { input: StmtId, index: usize },
    /// Sorted union of two id sets.
    Tunion { left: StmtId, right: StmtId },
    /// Values of `left` (ids) not present in `right` (ids).
    Tdiff { left: StmtId, right: StmtId },
    /// Values of `left` (ids) also present in `right` (ids).
    Tinter { left: StmtId, right: StmtId },
    /// Subset of the candidate domain whose `left` value occurs (`anti`:
    /// does not occur) among `right`'s values.
    Semijoin {
        left: StmtId,
        right: StmtId,
        cand: Option<StmtId>,
        anti: bool,
    },

    /// (Sub)grouping over one key column; outputs per-row group ids, one
    /// representative position per group (extent), and per-group counts.
    Group {
        input: StmtId,
        prev_groups: Option<StmtId>,
    },
    /// Grouped or scalar aggregate.
    Aggregate {
        func: AggrFunc,
        input: Option<StmtId>,
        groups: Option<StmtId>,
        extent: Option<StmtId>,
        skip_nils: bool,
    },

    /// Elementwise scalar function, broadcasting scalar operands.
    Call { func: ScalarFunc, inputs: Vec<StmtId> },
    /// Elementwise comparison yielding a nullable boolean.
    Cmp {
        op: CmpOp,
        left: StmtId,
        right: StmtId,
    },
    /// Elementwise type conversion.
    Cast { input: StmtId, to: DataType },

    /// Stable (re)ordering. Without `prev_ids`/`prev_groups` this sorts
    /// `input`; with them it reorders only within ties of the previous key.
    /// Outputs sorted values, positions, and tie groups.
    Order {
        input: StmtId,
        prev_ids: Option<StmtId>,
        prev_groups: Option<StmtId>,
        desc: bool,
        nulls_last: bool,
    },
    /// Bounded selection of the first `count` rows by one sort key,
    /// continuing a previous partial result through `prev_piv`/`prev_groups`.
    /// Partial steps output a candidate superset plus tie groups; the `last`
    /// step applies `offset` and outputs final positions in order.
    Limit {
        input: StmtId,
        prev_piv: Option<StmtId>,
        prev_groups: Option<StmtId>,
        count: StmtId,
        offset: Option<StmtId>,
        desc: bool,
        nulls_last: bool,
        last: bool,
    },
    /// Uniform sample of `size` positions of `input`.
    Sample {
        input: StmtId,
        size: StmtId,
        seed: u64,
    },

    /// Renaming wrapper; value passthrough carrying a fresh alias.
    Alias { input: StmtId },

    /// Reserve `count` fresh row positions in a table.
    Claim { table: String, count: StmtId },
    /// Write `values` at `positions` of a column, extending it.
    AppendCol {
        table: String,
        column: String,
        positions: StmtId,
        values: StmtId,
    },
    /// Overwrite a column at `rows` with `values`.
    UpdateCol {
        table: String,
        column: String,
        rows: StmtId,
        values: StmtId,
    },
    /// Remove rows at the given positions.
    DeleteRows { table: String, rows: StmtId },
    /// Remove all rows.
    ClearTable { table: String },
    /// Runtime-evaluated check; raises `error` when `cond` is true.
    Assert { cond: StmtId, error: AssertError },
}

impl StatementOp {
    /// Statements the executor must keep and evaluate in emission order.
    pub const fn has_side_effect(&self) -> bool {
        matches!(
            self,
            StatementOp::Claim { .. }
                | StatementOp::AppendCol { .. }
                | StatementOp::UpdateCol { .. }
                | StatementOp::DeleteRows { .. }
                | StatementOp::ClearTable { .. }
                | StatementOp::Assert { .. }
        )
    }

    pub const fn name(&self) -> &'static str {
        match self {
            StatementOp::Literal { .. } => "literal",
            StatementOp::ValueList { .. } => "value_list",
            StatementOp::BaseColumn { .. } => "base_column",
            StatementOp::TableIds { .. } => "table_ids",
            StatementOp::ConstColumn { .. } => "const_column",
            StatementOp::Mirror { .. } => "mirror",
            StatementOp::Project { .. } => "project",
            StatementOp::Append { .. } => "append",
            StatementOp::Replace { .. } => "replace",
            StatementOp::Expand { .. } => "expand",
            StatementOp::SelectCmp { .. } => "select_cmp",
            StatementOp::Join { .. } => "join",
            StatementOp::CrossJoin { .. } => "cross_join",
            StatementOp::IndexJoin { .. } => "index_join",
            StatementOp::NthResult { .. } => "nth_result",
            StatementOp::Tunion { .. } => "tunion",
            StatementOp::Tdiff { .. } => "tdiff",
            StatementOp::Tinter { .. } => "tinter",
            StatementOp::Semijoin { .. } => "semijoin",
            StatementOp::Group { .. } => "group",
            StatementOp::Aggregate { .. } => "aggregate",
            StatementOp::Call { .. } => "call",
            StatementOp::Cmp { .. } => "cmp",
            StatementOp::Cast { .. } => "cast",
            StatementOp::Order { .. } => "order",
            StatementOp::Limit { .. } => "limit",
            StatementOp::Sample { .. } => "sample",
            StatementOp::Alias { .. } => "alias",
            StatementOp::Claim { .. } => "claim",
            StatementOp::AppendCol { .. } => "append_col",
            StatementOp::UpdateCol { .. } => "update_col",
            StatementOp::DeleteRows { .. } => "delete_rows",
            StatementOp::ClearTable { .. } => "clear_table",
            StatementOp::Assert { .. } => "assert",
        }
    }

    /// Operand references in a fixed order, used by explain output and
    /// structural comparison.
    pub fn operands(&self) -> Vec<StmtId> {
        match self {
            StatementOp::Literal { .. }
            | StatementOp::ValueList { .. }
            | StatementOp::BaseColumn { .. }
            | StatementOp::TableIds { .. }
            | StatementOp::ClearTable { .. } => Vec::new(),
            StatementOp::ConstColumn { head, value } => vec![*head, *value],
            StatementOp::Mirror { input } => vec![*input],
            StatementOp::Project { ids, values } => vec![*ids, *values],
            StatementOp::Append { left, right } => vec![*left, *right],
            StatementOp::Replace {
                target,
                ids,
                values,
            } => vec![*target, *ids, *values],
            StatementOp::Expand { extent, counts } => vec![*extent, *counts],
            StatementOp::SelectCmp {
                input,
                value,
                value2,
                cand,
                ..
            } => {
                let mut ops = vec![*input, *value];
                ops.extend(*value2);
                ops.extend(*cand);
                ops
            }
            StatementOp::Join { left, right, .. } => vec![*left, *right],
            StatementOp::CrossJoin { left, right } => vec![*left, *right],
            StatementOp::IndexJoin { probe, .. } => vec![*probe],
            StatementOp::NthResult { input, .. } => vec![*input],
            StatementOp::Tunion { left, right } => vec![*left, *right],
            StatementOp::Tdiff { left, right } => vec![*left, *right],
            StatementOp::Tinter { left, right } => vec![*left, *right],
            StatementOp::Semijoin {
                left, right, cand, ..
            } => {
                let mut ops = vec![*left, *right];
                ops.extend(*cand);
                ops
            }
            StatementOp::Group { input, prev_groups } => {
                let mut ops = vec![*input];
                ops.extend(*prev_groups);
                ops
            }
            StatementOp::Aggregate {
                input,
                groups,
                extent,
                ..
            } => {
                let mut ops = Vec::new();
                ops.extend(*input);
                ops.extend(*groups);
                ops.extend(*extent);
                ops
            }
            StatementOp::Call { inputs, .. } => inputs.clone(),
            StatementOp::Cmp { left, right, .. } => vec![*left, *right],
            StatementOp::Cast { input, .. } => vec![*input],
            StatementOp::Order {
                input,
                prev_ids,
                prev_groups,
                ..
            } => {
                let mut ops = vec![*input];
                ops.extend(*prev_ids);
                ops.extend(*prev_groups);
                ops
            }
            StatementOp::Limit {
                input,
                prev_piv,
                prev_groups,
                count,
                offset,
                ..
            } => {
                let mut ops = vec![*input];
                ops.extend(*prev_piv);
                ops.extend(*prev_groups);
                ops.push(*count);
                ops.extend(*offset);
                ops
            }
            StatementOp::Sample { input, size, .. } => vec![*input, *size],
            StatementOp::Alias { input } => vec![*input],
            StatementOp::Claim { count, .. } => vec![*count],
            StatementOp::AppendCol {
                positions, values, ..
            } => vec![*positions, *values],
            StatementOp::UpdateCol { rows, values, .. } => vec![*rows, *values],
            StatementOp::DeleteRows { rows, .. } => vec![*rows],
            StatementOp::Assert { cond, .. } => vec![*cond],
        }
    }
}
