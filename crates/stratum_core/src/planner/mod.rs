//! Compilation of relational plan trees into statement graphs.
//!
//! All state for one top-level compile lives in [`PlanState`]: the statement
//! graph under construction, the shared-subplan cache, the recursion depth
//! counter, trigger view frames, and the processed-cascade set. Nothing is
//! shared across compiles.

mod plan_delete;
mod plan_expr;
mod plan_group;
mod plan_insert;
mod plan_join;
mod plan_project;
mod plan_setop;
mod plan_topn;
mod plan_update;

#[cfg(test)]
mod tests;

use hashbrown::HashMap;
use stratum_error::{DbError, DbErrorKind, Result};
use tracing::{debug, trace};

use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::catalog::Catalog;
use crate::catalog::entry::TableEntry;
use crate::plan::expr::{AggrFunc, CmpOp};
use crate::plan::operator::{BaseTable, DdlList, PlanTree, RelId, RelOp, SetOpKind};
use crate::statements::ops::{AssertError, StatementOp};
use crate::statements::{Cardinality, CompiledPlan, OutputColumn, Statement, StatementGraph, StmtId};

/// Name of the implicit row-id column every base table exposes.
pub const TID_COLUMN: &str = "%TID%";

/// Relations wider than this get a hash index over their binding names.
const WIDE_RELATION: usize = 32;

/// Per-compile tunables.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Maximum structural recursion depth before the compile fails with a
    /// resource-exhaustion error.
    pub max_depth: usize,
    /// IN-lists with at least this many elements are materialized and
    /// deduplicated instead of expanded into chained selects.
    pub in_list_threshold: usize,
    /// Allow index-accelerated equi-join lookups where a key carries an
    /// index descriptor.
    pub use_index_joins: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            max_depth: 512,
            in_list_threshold: 16,
            use_index_joins: true,
        }
    }
}

/// One output column of a relation under compilation.
#[derive(Debug, Clone)]
pub(crate) struct ColumnStmt {
    pub id: StmtId,
    pub table: String,
    pub name: String,
    pub datatype: DataType,
    /// Cardinality-zero value; promoted to a constant column when mixed with
    /// row-valued siblings.
    pub scalar: bool,
    /// Outer-join padding must use zero instead of null for this column.
    pub outer_zero: bool,
}

impl ColumnStmt {
    pub fn new(
        id: StmtId,
        table: impl Into<String>,
        name: impl Into<String>,
        datatype: DataType,
    ) -> Self {
        ColumnStmt {
            id,
            table: table.into(),
            name: name.into(),
            datatype,
            scalar: false,
            outer_zero: false,
        }
    }
}

/// A compiled relation: aliased columns plus an optional candidate set
/// restricting which of their rows are live. The candidate's domain always
/// matches the columns it restricts.
#[derive(Debug, Clone, Default)]
pub(crate) struct RelationStmt {
    pub cols: Vec<ColumnStmt>,
    pub cand: Option<StmtId>,
    /// Hash index over binding names, built for wide relations.
    index: Option<HashMap<(String, String), usize>>,
}

impl RelationStmt {
    pub fn new(cols: Vec<ColumnStmt>) -> Self {
        let mut rel = RelationStmt {
            cols,
            cand: None,
            index: None,
        };
        rel.reindex();
        rel
    }

    pub fn with_cand(mut self, cand: Option<StmtId>) -> Self {
        self.cand = cand;
        self
    }

    pub fn reindex(&mut self) {
        if self.cols.len() >= WIDE_RELATION {
            let mut index = HashMap::with_capacity(self.cols.len());
            for (pos, col) in self.cols.iter().enumerate() {
                index
                    .entry((col.table.clone(), col.name.clone()))
                    .or_insert(pos);
            }
            self.index = Some(index);
        } else {
            self.index = None;
        }
    }

    /// Resolve a `table.column` reference. Unqualified references match the
    /// first column with the given name.
    pub fn bind(&self, table: Option<&str>, name: &str) -> Option<&ColumnStmt> {
        match (table, &self.index) {
            (Some(table), Some(index)) => index
                .get(&(table.to_string(), name.to_string()))
                .map(|&pos| &self.cols[pos]),
            (Some(table), None) => self
                .cols
                .iter()
                .find(|c| c.table == table && c.name == name),
            (None, _) => self.cols.iter().find(|c| c.name == name),
        }
    }

    pub fn first_column(&self) -> Option<&ColumnStmt> {
        self.cols.iter().find(|c| !c.scalar)
    }
}

/// Active (group ids, representative extent, per-group counts) triple.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupingCtx {
    pub groups: StmtId,
    pub extent: StmtId,
    pub counts: StmtId,
}

/// Entry point.
#[derive(Debug)]
pub struct StatementPlanner;

impl StatementPlanner {
    /// Compile a plan tree into a statement graph. A fresh subplan cache is
    /// used per call, so recompiling the same tree yields a structurally
    /// identical graph.
    pub fn plan(catalog: &Catalog, tree: &PlanTree, config: PlanConfig) -> Result<CompiledPlan> {
        debug!(nodes = tree.len(), "compiling plan tree");
        let mut state = PlanState::new(catalog, config);
        let rel = state.plan_rel(tree, tree.root()?)?;
        let rel = state.materialized(rel)?;

        let outputs = rel
            .cols
            .iter()
            .map(|c| OutputColumn {
                id: c.id,
                table: c.table.clone(),
                name: c.name.clone(),
                datatype: c.datatype,
            })
            .collect();

        Ok(CompiledPlan {
            graph: state.graph,
            outputs,
        })
    }
}

pub(crate) struct PlanState<'a> {
    pub catalog: &'a Catalog,
    pub config: PlanConfig,
    pub graph: StatementGraph,
    /// Shared-subplan cache keyed by (tree tag, node id); a hit returns the
    /// prior result unchanged.
    refs: HashMap<(u32, RelId), RelationStmt>,
    /// Tag of the tree currently being walked; trigger bodies get fresh tags
    /// so their node ids cannot collide with the main tree's.
    tree_tag: u32,
    next_tag: u32,
    depth: usize,
    /// Named relations visible to base-table resolution, innermost last.
    /// Holds OLD/NEW row sets while trigger bodies compile.
    pub views: Vec<(String, RelationStmt)>,
    /// Foreign keys already cascaded during the current top-level DML
    /// statement, keyed by (child table, constraint name); breaks
    /// referential cycles.
    pub cascades: Vec<(String, String)>,
}

impl<'a> PlanState<'a> {
    pub fn new(catalog: &'a Catalog, config: PlanConfig) -> Self {
        PlanState {
            catalog,
            config,
            graph: StatementGraph::new(),
            refs: HashMap::new(),
            tree_tag: 0,
            next_tag: 0,
            depth: 0,
            views: Vec::new(),
            cascades: Vec::new(),
        }
    }

    /// Dispatch on operator kind. Checks the subplan cache first and applies
    /// the renaming pass to fresh results.
    pub fn plan_rel(&mut self, tree: &PlanTree, id: RelId) -> Result<RelationStmt> {
        if let Some(rel) = self.refs.get(&(self.tree_tag, id)) {
            return Ok(rel.clone());
        }

        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(DbError::with_kind(
                DbErrorKind::ResourceExhausted,
                "Query too complex: running out of stack space",
            ));
        }

        let node = tree.node(id)?.clone();
        trace!(op = node.op.name(), %id, "planning node");

        let mut rel = match &node.op {
            RelOp::BaseTable(n) => self.plan_base_table(n)?,
            RelOp::Project(n) => self.plan_project(tree, n)?,
            RelOp::Select(n) => self.plan_filter(tree, n)?,
            RelOp::Join(n) => self.plan_join(tree, n)?,
            RelOp::GroupBy(n) => self.plan_group_by(tree, n)?,
            RelOp::TopN(n) => self.plan_top_n(tree, n)?,
            RelOp::Sample(n) => self.plan_sample(tree, n)?,
            RelOp::SetOp(n) => self.plan_set_op(tree, n, node.distinct)?,
            RelOp::Insert(n) => self.plan_insert(tree, n)?,
            RelOp::Update(n) => self.plan_update(tree, n)?,
            RelOp::Delete(n) => self.plan_delete(tree, n)?,
            RelOp::Truncate(n) => self.plan_truncate(n)?,
            RelOp::Ddl(n) => self.plan_ddl(tree, n)?,
        };

        // Except/intersect consume the distinct flag themselves.
        let distinct_handled =
            matches!(&node.op, RelOp::SetOp(s) if s.kind != SetOpKind::Union);
        if node.distinct && !distinct_handled {
            rel = self.distinct_relation(rel)?;
        }
        if node.single {
            rel = self.single_relation(rel)?;
        }

        let rel = self.rename(rel)?;
        self.depth -= 1;
        self.refs.insert((self.tree_tag, id), rel.clone());
        Ok(rel)
    }

    /// Compile a detached tree (a trigger body) under a fresh cache tag with
    /// the given views in scope. Its outputs are discarded; only its side
    /// effects matter.
    pub fn plan_subtree(
        &mut self,
        tree: &PlanTree,
        views: Vec<(String, RelationStmt)>,
    ) -> Result<()> {
        let pushed = views.len();
        self.views.extend(views);

        self.next_tag += 1;
        let saved = std::mem::replace(&mut self.tree_tag, self.next_tag);
        let result = tree.root().and_then(|root| self.plan_rel(tree, root));
        self.tree_tag = saved;

        self.views.truncate(self.views.len() - pushed);
        result.map(|_| ())
    }

    fn plan_base_table(&mut self, n: &BaseTable) -> Result<RelationStmt> {
        let bind_name = n.alias.as_deref().unwrap_or(&n.table);

        // Trigger OLD/NEW frames shadow catalog tables, innermost first.
        if let Some((_, rel)) = self
            .views
            .iter()
            .rev()
            .find(|(name, _)| name == &n.table)
            .cloned()
        {
            let mut rel = rel;
            for col in &mut rel.cols {
                col.table = bind_name.to_string();
            }
            rel.reindex();
            return Ok(rel);
        }

        let table = self.catalog.table(&n.table)?.clone();
        let mut cols = Vec::with_capacity(table.columns.len() + 1);
        let mut head = None;
        for col in &table.columns {
            let id = self.push(
                StatementOp::BaseColumn {
                    table: table.name.clone(),
                    column: col.name.clone(),
                },
                col.datatype,
                Cardinality::Column,
            );
            head.get_or_insert(id);
            cols.push(ColumnStmt::new(id, bind_name, &col.name, col.datatype));
        }
        let live = self.push(
            StatementOp::TableIds {
                table: table.name.clone(),
            },
            DataType::Int64,
            Cardinality::Column,
        );
        // Row ids surface as an identity column over the full position
        // domain; applying the candidate turns it into the live positions.
        let rowid = match head {
            Some(head) => self.mirror(head),
            None => live,
        };
        cols.push(ColumnStmt::new(rowid, bind_name, TID_COLUMN, DataType::Int64));
        Ok(RelationStmt::new(cols).with_cand(Some(live)))
    }

    fn plan_ddl(&mut self, tree: &PlanTree, n: &DdlList) -> Result<RelationStmt> {
        let mut last = None;
        for &part in &n.parts {
            last = Some(self.plan_rel(tree, part)?);
        }
        last.ok_or_else(|| DbError::with_kind(DbErrorKind::Semantic, "empty statement list"))
    }

    /// Aliasing and scalar promotion over a freshly compiled output list.
    fn rename(&mut self, mut rel: RelationStmt) -> Result<RelationStmt> {
        let head = rel.first_column().map(|c| c.id);

        for pos in 0..rel.cols.len() {
            if let (Some(head_id), true) = (head, rel.cols[pos].scalar) {
                let value = rel.cols[pos].id;
                let datatype = rel.cols[pos].datatype;
                let id = self.push(
                    StatementOp::ConstColumn {
                        head: head_id,
                        value,
                    },
                    datatype,
                    Cardinality::Column,
                );
                rel.cols[pos].id = id;
                rel.cols[pos].scalar = false;
            }

            let col = &rel.cols[pos];
            let alias = (col.table.clone(), col.name.clone());
            let stmt = self.graph.get_mut(col.id)?;
            match &stmt.alias {
                None => stmt.alias = Some(alias),
                Some(existing) if *existing == alias => {}
                Some(_) => {
                    // Shared statement surfacing under a second name.
                    let datatype = stmt.datatype;
                    let card = stmt.card;
                    let id = self.push_aliased(
                        StatementOp::Alias { input: col.id },
                        datatype,
                        card,
                        alias,
                    );
                    rel.cols[pos].id = id;
                }
            }
        }

        rel.reindex();
        Ok(rel)
    }

    /// Apply the candidate so every column is a plain aligned column.
    pub fn materialized(&mut self, rel: RelationStmt) -> Result<RelationStmt> {
        let Some(cand) = rel.cand else {
            return Ok(rel);
        };
        let mut cols = rel.cols;
        for col in &mut cols {
            if !col.scalar {
                col.id = self.project(cand, col.id, col.datatype);
            }
        }
        Ok(RelationStmt::new(cols))
    }

    /// Full multi-column deduplication keeping one representative row per
    /// group.
    pub fn distinct_relation(&mut self, rel: RelationStmt) -> Result<RelationStmt> {
        let rel = self.materialized(rel)?;
        let col_ids: Vec<StmtId> = rel.cols.iter().map(|c| c.id).collect();
        let Some(grp) = self.group_columns(&col_ids)? else {
            return Ok(rel);
        };
        let mut cols = rel.cols;
        for col in &mut cols {
            col.id = self.project(grp.extent, col.id, col.datatype);
        }
        Ok(RelationStmt::new(cols))
    }

    /// Collapse each column to its single value, raising a cardinality error
    /// at runtime when more than one row remains.
    fn single_relation(&mut self, rel: RelationStmt) -> Result<RelationStmt> {
        let rel = self.materialized(rel)?;
        let mut cols = rel.cols;
        for col in &mut cols {
            if col.scalar {
                continue;
            }
            col.id = self.push(
                StatementOp::Aggregate {
                    func: AggrFunc::ZeroOrOne,
                    input: Some(col.id),
                    groups: None,
                    extent: None,
                    skip_nils: false,
                },
                col.datatype,
                Cardinality::Scalar,
            );
            col.scalar = true;
        }
        Ok(RelationStmt::new(cols))
    }

    /// Incremental grouping over a list of key columns. `None` when the list
    /// is empty.
    pub fn group_columns(&mut self, cols: &[StmtId]) -> Result<Option<GroupingCtx>> {
        let mut grp: Option<GroupingCtx> = None;
        for &col in cols {
            let g = self.push(
                StatementOp::Group {
                    input: col,
                    prev_groups: grp.map(|g| g.groups),
                },
                DataType::Int64,
                Cardinality::Column,
            );
            grp = Some(GroupingCtx {
                groups: self.nth(g, 0, DataType::Int64),
                extent: self.nth(g, 1, DataType::Int64),
                counts: self.nth(g, 2, DataType::Int64),
            });
        }
        Ok(grp)
    }

    /// Whether a node of the current tree already compiled.
    pub(crate) fn is_cached(&self, id: RelId) -> bool {
        self.refs.contains_key(&(self.tree_tag, id))
    }

    // --- statement push helpers ---

    pub fn push(&mut self, op: StatementOp, datatype: DataType, card: Cardinality) -> StmtId {
        self.graph.push(Statement::new(op, datatype, card))
    }

    fn push_aliased(
        &mut self,
        op: StatementOp,
        datatype: DataType,
        card: Cardinality,
        alias: (String, String),
    ) -> StmtId {
        let mut stmt = Statement::new(op, datatype, card);
        stmt.alias = Some(alias);
        self.graph.push(stmt)
    }

    pub fn lit(&mut self, value: ScalarValue, datatype: DataType) -> StmtId {
        self.push(StatementOp::Literal { value }, datatype, Cardinality::Scalar)
    }

    pub fn lit_i64(&mut self, v: i64) -> StmtId {
        self.lit(ScalarValue::Int64(v), DataType::Int64)
    }

    pub fn lit_bool(&mut self, v: bool) -> StmtId {
        self.lit(ScalarValue::Boolean(v), DataType::Boolean)
    }

    pub fn null_lit(&mut self, datatype: DataType) -> StmtId {
        self.lit(ScalarValue::Null, datatype)
    }

    pub fn mirror(&mut self, input: StmtId) -> StmtId {
        self.push(
            StatementOp::Mirror { input },
            DataType::Int64,
            Cardinality::Column,
        )
    }

    pub fn project(&mut self, ids: StmtId, values: StmtId, datatype: DataType) -> StmtId {
        self.push(
            StatementOp::Project { ids, values },
            datatype,
            Cardinality::Column,
        )
    }

    pub fn nth(&mut self, input: StmtId, index: usize, datatype: DataType) -> StmtId {
        self.push(
            StatementOp::NthResult { input, index },
            datatype,
            Cardinality::Column,
        )
    }

    /// Row count of a column or candidate.
    pub fn count(&mut self, input: StmtId) -> StmtId {
        self.push(
            StatementOp::Aggregate {
                func: AggrFunc::Count,
                input: Some(input),
                groups: None,
                extent: None,
                skip_nils: false,
            },
            DataType::Int64,
            Cardinality::Scalar,
        )
    }

    pub fn cmp(&mut self, op: CmpOp, left: StmtId, right: StmtId, card: Cardinality) -> StmtId {
        self.push(StatementOp::Cmp { op, left, right }, DataType::Boolean, card)
    }

    /// Runtime assertion raising a named error when `cond` is true.
    pub fn assert(&mut self, cond: StmtId, kind: DbErrorKind, message: impl Into<String>) {
        self.push(
            StatementOp::Assert {
                cond,
                error: AssertError {
                    kind,
                    message: message.into(),
                },
            },
            DataType::Boolean,
            Cardinality::Scalar,
        );
    }

    /// Assert that two scalar counts are equal.
    pub fn assert_counts_equal(
        &mut self,
        a: StmtId,
        b: StmtId,
        kind: DbErrorKind,
        message: impl Into<String>,
    ) {
        let cond = self.cmp(CmpOp::NotEq, a, b, Cardinality::Scalar);
        self.assert(cond, kind, message);
    }

    /// Look up a table and clone its entry, releasing the catalog borrow.
    pub fn table_entry(&mut self, name: &str) -> Result<TableEntry> {
        self.catalog.table(name).cloned()
    }
}
