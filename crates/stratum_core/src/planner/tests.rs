use stratum_error::DbErrorKind;

use super::{PlanConfig, StatementPlanner, TID_COLUMN};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;
use crate::catalog::Catalog;
use crate::catalog::entry::{
    ColumnEntry,
    FkAction,
    ForeignKeyEntry,
    IndexDesc,
    KeyEntry,
    KeyKind,
    TableEntry,
    TriggerEntry,
    TriggerEvent,
    TriggerTiming,
};
use crate::explain::format_plan;
use crate::plan::expr::{
    AggrFunc,
    AggregateExpr,
    CaseExpr,
    CmpOp,
    CoalesceExpr,
    ColumnExpr,
    ComparisonExpr,
    Expression,
    InListExpr,
    LiteralExpr,
    NamedExpr,
    OrderKey,
};
use crate::plan::operator::{
    BaseTable,
    DdlList,
    Delete,
    GroupBy,
    Insert,
    Join,
    JoinKind,
    PlanTree,
    Project,
    RelId,
    RelNode,
    RelOp,
    Sample,
    Select,
    SetOp,
    SetOpKind,
    TopN,
    Truncate,
    Update,
};
use crate::statements::CompiledPlan;
use crate::testutil::interp::run_rows;
use crate::testutil::storage::TestDb;

fn compile(catalog: &Catalog, tree: &PlanTree) -> CompiledPlan {
    StatementPlanner::plan(catalog, tree, PlanConfig::default()).unwrap()
}

fn int_table(name: &str, cols: &[&str]) -> TableEntry {
    let mut table = TableEntry::new(name);
    for col in cols {
        table
            .columns
            .push(ColumnEntry::new(*col, DataType::Int64, true));
    }
    table
}

fn pk(name: &str, columns: Vec<usize>) -> KeyEntry {
    KeyEntry {
        name: name.to_string(),
        kind: KeyKind::Primary,
        columns,
        index: None,
    }
}

fn fk(
    name: &str,
    columns: Vec<usize>,
    ref_table: &str,
    ref_key: &str,
    on_update: FkAction,
    on_delete: FkAction,
) -> ForeignKeyEntry {
    ForeignKeyEntry {
        name: name.to_string(),
        columns,
        ref_table: ref_table.to_string(),
        ref_key: ref_key.to_string(),
        on_update,
        on_delete,
    }
}

fn i(v: i64) -> ScalarValue {
    ScalarValue::Int64(v)
}

fn irow(vals: &[i64]) -> Vec<ScalarValue> {
    vals.iter().map(|&v| i(v)).collect()
}

fn rows1(vals: &[i64]) -> Vec<Vec<ScalarValue>> {
    vals.iter().map(|&v| vec![i(v)]).collect()
}

fn rows2(vals: &[(i64, i64)]) -> Vec<Vec<ScalarValue>> {
    vals.iter().map(|&(a, b)| vec![i(a), i(b)]).collect()
}

fn typed_lit(value: ScalarValue, datatype: DataType) -> Expression {
    Expression::Literal(LiteralExpr { value, datatype })
}

fn lit(v: i64) -> Expression {
    typed_lit(ScalarValue::Int64(v), DataType::Int64)
}

fn null_lit() -> Expression {
    typed_lit(ScalarValue::Null, DataType::Int64)
}

fn col(table: &str, column: &str) -> Expression {
    Expression::Column(ColumnExpr {
        table: Some(table.to_string()),
        column: column.to_string(),
        datatype: DataType::Int64,
    })
}

fn col_any(column: &str) -> Expression {
    Expression::Column(ColumnExpr {
        table: None,
        column: column.to_string(),
        datatype: DataType::Boolean,
    })
}

fn cmp(op: CmpOp, left: Expression, right: Expression) -> Expression {
    Expression::Comparison(ComparisonExpr {
        op,
        left: Box::new(left),
        right: Box::new(right),
        right2: None,
        anti: false,
        is_semantics: false,
    })
}

fn eq(left: Expression, right: Expression) -> Expression {
    cmp(CmpOp::Eq, left, right)
}

fn in_list(expr: Expression, list: Vec<Expression>, negated: bool) -> Expression {
    Expression::InList(InListExpr {
        expr: Box::new(expr),
        list,
        negated,
    })
}

fn agg(func: AggrFunc, input: Option<Expression>, datatype: DataType) -> Expression {
    Expression::Aggregate(AggregateExpr {
        func,
        input: input.map(Box::new),
        distinct: false,
        skip_nils: true,
        outer_zero: false,
        datatype,
    })
}

fn count_star() -> Expression {
    Expression::Aggregate(AggregateExpr {
        func: AggrFunc::Count,
        input: None,
        distinct: false,
        skip_nils: false,
        outer_zero: false,
        datatype: DataType::Int64,
    })
}

fn out(expr: Expression, name: &str) -> NamedExpr {
    NamedExpr::new(expr, "q", name)
}

fn asc(expr: Expression) -> OrderKey {
    OrderKey {
        expr,
        desc: false,
        nulls_last: false,
    }
}

fn desc(expr: Expression) -> OrderKey {
    OrderKey {
        expr,
        desc: true,
        nulls_last: false,
    }
}

fn scan(tree: &mut PlanTree, table: &str) -> RelId {
    tree.push(RelNode::new(RelOp::BaseTable(BaseTable {
        table: table.to_string(),
        alias: None,
    })))
}

fn filter(tree: &mut PlanTree, input: RelId, predicates: Vec<Expression>) -> RelId {
    tree.push(RelNode::new(RelOp::Select(Select { input, predicates })))
}

fn project(tree: &mut PlanTree, input: RelId, exprs: Vec<NamedExpr>) -> RelId {
    tree.push(RelNode::new(RelOp::Project(Project {
        input,
        exprs,
        order: Vec::new(),
    })))
}

fn ordered_project(
    tree: &mut PlanTree,
    input: RelId,
    exprs: Vec<NamedExpr>,
    order: Vec<OrderKey>,
) -> RelId {
    tree.push(RelNode::new(RelOp::Project(Project {
        input,
        exprs,
        order,
    })))
}

fn join(
    tree: &mut PlanTree,
    left: RelId,
    right: RelId,
    kind: JoinKind,
    predicates: Vec<Expression>,
) -> RelId {
    tree.push(RelNode::new(RelOp::Join(Join {
        left,
        right,
        kind,
        predicates,
        mark_name: None,
    })))
}

/// One-row VALUES source. The projected literals stay scalar; insert
/// compilation turns them into a single row.
fn values_row(tree: &mut PlanTree, dual: RelId, values: Vec<Expression>) -> RelId {
    let exprs = values
        .into_iter()
        .enumerate()
        .map(|(idx, e)| NamedExpr::new(e, "v", format!("c{idx}")))
        .collect();
    project(tree, dual, exprs)
}

fn add_dual(catalog: &mut Catalog, db: &mut TestDb) {
    catalog.add_table(int_table("dual", &["x"]));
    db.add_table("dual", 1, vec![vec![i(0)]]);
}

// --- scans, filters, projections ---

#[test]
fn filter_narrows_and_projects() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a", "b"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 10), (3, 30), (5, 50)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let f = filter(&mut tree, s, vec![cmp(CmpOp::Gt, col("t", "a"), lit(2))]);
    let p = project(&mut tree, f, vec![out(col("t", "a"), "a"), out(col("t", "b"), "b")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[3, 30]), irow(&[5, 50])]);
}

#[test]
fn chained_filters_compare_columns() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a", "b"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 9), (2, 5), (3, 3)]));

    // The second predicate runs over the candidates of the first, so its
    // column operand must be read in that narrowed domain.
    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let f = filter(
        &mut tree,
        s,
        vec![
            cmp(CmpOp::Gt, col("t", "a"), lit(1)),
            eq(col("t", "a"), col("t", "b")),
        ],
    );
    let p = project(&mut tree, f, vec![out(col("t", "a"), "a"), out(col("t", "b"), "b")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[3, 3])]);
}

#[test]
fn order_by_two_keys() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a", "b"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 10), (0, 5), (1, 20)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = ordered_project(
        &mut tree,
        s,
        vec![out(col("t", "a"), "a"), out(col("t", "b"), "b")],
        vec![asc(col("t", "a")), desc(col("t", "b"))],
    );
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[0, 5]), irow(&[1, 20]), irow(&[1, 10])]);
}

#[test]
fn constant_order_key_is_rejected() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = ordered_project(
        &mut tree,
        s,
        vec![out(col("t", "a"), "a")],
        vec![asc(lit(1))],
    );
    tree.root = Some(p);

    let err = StatementPlanner::plan(&catalog, &tree, PlanConfig::default()).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::Semantic);
}

// --- joins ---

#[test]
fn multi_column_join_drops_hash_collisions() {
    // With two key columns the fold width is 22 bits, so (1, 0) and
    // (0, 1 << 22) share a combined hash while differing column-wise. The
    // verification pass must keep only the exact matches.
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["x", "y"]));
    catalog.add_table(int_table("r", &["x", "y"]));
    let mut db = TestDb::new();
    db.add_table("l", 2, rows2(&[(1, 0), (0, 1 << 22)]));
    db.add_table("r", 2, rows2(&[(1, 0), (0, 1 << 22)]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let r = scan(&mut tree, "r");
    let j = join(
        &mut tree,
        l,
        r,
        JoinKind::Inner,
        vec![
            eq(col("l", "x"), col("r", "x")),
            eq(col("l", "y"), col("r", "y")),
        ],
    );
    let p = project(&mut tree, j, vec![out(col("l", "x"), "x"), out(col("l", "y"), "y")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1, 0]), irow(&[0, 1 << 22])]);
}

#[test]
fn index_join_probes_key_index_and_verifies() {
    let mut catalog = Catalog::new();
    let mut part = int_table("part", &["p1", "p2"]);
    part.keys.push(KeyEntry {
        name: "part_pk".to_string(),
        kind: KeyKind::Primary,
        columns: vec![0, 1],
        index: Some(IndexDesc {
            name: "part_pk_idx".to_string(),
        }),
    });
    catalog.add_table(part);
    catalog.add_table(int_table("lookup", &["l1", "l2"]));
    let mut db = TestDb::new();
    db.add_table("part", 2, rows2(&[(1, 0), (0, 1 << 22)]));
    db.add_table("lookup", 2, rows2(&[(0, 1 << 22), (9, 9)]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "lookup");
    let r = scan(&mut tree, "part");
    let j = join(
        &mut tree,
        l,
        r,
        JoinKind::Inner,
        vec![
            eq(col("lookup", "l1"), col("part", "p1")),
            eq(col("lookup", "l2"), col("part", "p2")),
        ],
    );
    let p = project(
        &mut tree,
        j,
        vec![out(col("part", "p1"), "p1"), out(col("part", "p2"), "p2")],
    );
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    assert!(format_plan(&plan).contains("index_join("));
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[0, 1 << 22])]);

    // Disabling index lookups falls back to the generic path with the same
    // result.
    let config = PlanConfig {
        use_index_joins: false,
        ..PlanConfig::default()
    };
    let generic = StatementPlanner::plan(&catalog, &tree, config).unwrap();
    assert!(!format_plan(&generic).contains("index_join("));
    let rows = run_rows(&catalog, &generic, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[0, 1 << 22])]);
}

#[test]
fn left_join_pads_unmatched_rows() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["a", "v"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, rows1(&[1, 2]));
    db.add_table("r", 2, rows2(&[(2, 20)]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let r = scan(&mut tree, "r");
    let j = join(
        &mut tree,
        l,
        r,
        JoinKind::Left,
        vec![eq(col("l", "a"), col("r", "a"))],
    );
    let p = project(&mut tree, j, vec![out(col("l", "a"), "a"), out(col("r", "v"), "v")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(
        rows,
        vec![irow(&[2, 20]), vec![i(1), ScalarValue::Null]]
    );
}

#[test]
fn full_join_pads_both_sides() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["a", "v"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, rows1(&[1, 2]));
    db.add_table("r", 2, rows2(&[(2, 20), (9, 90)]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let r = scan(&mut tree, "r");
    let j = join(
        &mut tree,
        l,
        r,
        JoinKind::Full,
        vec![eq(col("l", "a"), col("r", "a"))],
    );
    let p = project(&mut tree, j, vec![out(col("l", "a"), "a"), out(col("r", "v"), "v")]);
    tree.root = Some(p);

    // Matched rows first, then left-unmatched, then right-unmatched.
    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(
        rows,
        vec![
            irow(&[2, 20]),
            vec![i(1), ScalarValue::Null],
            vec![ScalarValue::Null, i(90)],
        ]
    );
}

#[test]
fn semi_and_anti_joins() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["b"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, rows1(&[1, 2, 3]));
    db.add_table("r", 1, rows1(&[2, 3, 3]));

    let mut semi = PlanTree::new();
    let l = scan(&mut semi, "l");
    let r = scan(&mut semi, "r");
    let j = join(&mut semi, l, r, JoinKind::Semi, vec![eq(col("l", "a"), col("r", "b"))]);
    let p = project(&mut semi, j, vec![out(col("l", "a"), "a")]);
    semi.root = Some(p);
    let plan = compile(&catalog, &semi);
    assert_eq!(
        run_rows(&catalog, &plan, &mut db).unwrap(),
        vec![irow(&[2]), irow(&[3])]
    );

    let mut anti = PlanTree::new();
    let l = scan(&mut anti, "l");
    let r = scan(&mut anti, "r");
    let j = join(&mut anti, l, r, JoinKind::Anti, vec![eq(col("l", "a"), col("r", "b"))]);
    let p = project(&mut anti, j, vec![out(col("l", "a"), "a")]);
    anti.root = Some(p);
    let plan = compile(&catalog, &anti);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), vec![irow(&[1])]);
}

#[test]
fn mark_join_is_three_valued() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["b"]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let r = scan(&mut tree, "r");
    let j = tree.push(RelNode::new(RelOp::Join(Join {
        left: l,
        right: r,
        kind: JoinKind::Mark,
        predicates: vec![eq(col("l", "a"), col("r", "b"))],
        mark_name: Some("m".to_string()),
    })));
    let p = project(&mut tree, j, vec![out(col("l", "a"), "a"), out(col_any("m"), "m")]);
    tree.root = Some(p);
    let plan = compile(&catalog, &tree);

    // Matched probes are true, null probes unknown, the rest false.
    let mut db = TestDb::new();
    db.add_table("l", 1, vec![vec![i(1)], vec![ScalarValue::Null], vec![i(5)]]);
    db.add_table("r", 1, rows1(&[1, 2]));
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![i(1), ScalarValue::Boolean(true)],
            vec![ScalarValue::Null, ScalarValue::Null],
            vec![i(5), ScalarValue::Boolean(false)],
        ]
    );

    // Against an empty inner side even null probes resolve to false.
    let mut db = TestDb::new();
    db.add_table("l", 1, vec![vec![i(1)], vec![ScalarValue::Null], vec![i(5)]]);
    db.add_table("r", 1, Vec::new());
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![i(1), ScalarValue::Boolean(false)],
            vec![ScalarValue::Null, ScalarValue::Boolean(false)],
            vec![i(5), ScalarValue::Boolean(false)],
        ]
    );
}

// --- grouping and aggregation ---

#[test]
fn group_by_with_plain_and_distinct_aggregates() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["k", "v"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 10), (1, 10), (1, 20), (2, 30)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let distinct_sum = Expression::Aggregate(AggregateExpr {
        func: AggrFunc::Sum,
        input: Some(Box::new(col("t", "v"))),
        distinct: true,
        skip_nils: true,
        outer_zero: false,
        datatype: DataType::Int64,
    });
    let g = tree.push(RelNode::new(RelOp::GroupBy(GroupBy {
        input: s,
        keys: vec![col("t", "k")],
        outputs: vec![
            out(col("t", "k"), "k"),
            out(count_star(), "cnt"),
            out(agg(AggrFunc::Sum, Some(col("t", "v")), DataType::Int64), "total"),
            out(distinct_sum, "dtotal"),
        ],
    })));
    tree.root = Some(g);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1, 3, 40, 30]), irow(&[2, 1, 30, 30])]);
}

#[test]
fn empty_key_list_aggregates_globally() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[1, 2, 3]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let g = tree.push(RelNode::new(RelOp::GroupBy(GroupBy {
        input: s,
        keys: Vec::new(),
        outputs: vec![
            out(count_star(), "cnt"),
            out(agg(AggrFunc::Avg, Some(col("t", "a")), DataType::Float64), "mean"),
        ],
    })));
    tree.root = Some(g);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![vec![i(3), ScalarValue::Float64(2.0)]]);
}

// --- set operations ---

fn setop_tree(kind: SetOpKind, distinct: bool) -> PlanTree {
    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let lp = project(&mut tree, l, vec![out(col("l", "a"), "a")]);
    let r = scan(&mut tree, "r");
    let rp = project(&mut tree, r, vec![out(col("r", "a"), "a")]);
    let mut node = RelNode::new(RelOp::SetOp(SetOp {
        kind,
        left: lp,
        right: rp,
    }));
    if distinct {
        node = node.with_distinct();
    }
    tree.push_root(node);
    tree
}

#[test]
fn union_all_and_distinct() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["a"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, rows1(&[1, 2, 2]));
    db.add_table("r", 1, rows1(&[2, 3]));

    let all = setop_tree(SetOpKind::Union, false);
    let plan = compile(&catalog, &all);
    assert_eq!(
        run_rows(&catalog, &plan, &mut db).unwrap(),
        rows1(&[1, 2, 2, 2, 3])
    );

    let distinct = setop_tree(SetOpKind::Union, true);
    let plan = compile(&catalog, &distinct);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1, 2, 3]));
}

#[test]
fn union_of_literal_rows() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);

    // Both operands are one-row VALUES projections, so the set operation
    // has to materialize them before appending or grouping.
    let literal_setop = |kind: SetOpKind, lv: i64, rv: i64| {
        let mut tree = PlanTree::new();
        let dual = scan(&mut tree, "dual");
        let lp = values_row(&mut tree, dual, vec![lit(lv)]);
        let rp = values_row(&mut tree, dual, vec![lit(rv)]);
        tree.push_root(RelNode::new(RelOp::SetOp(SetOp {
            kind,
            left: lp,
            right: rp,
        })));
        tree
    };

    let plan = compile(&catalog, &literal_setop(SetOpKind::Union, 1, 2));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1, 2]));

    let plan = compile(&catalog, &literal_setop(SetOpKind::Intersect, 1, 1));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1]));
}

#[test]
fn except_and_intersect_multiplicities() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["a"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, rows1(&[1, 1, 1, 2]));
    db.add_table("r", 1, rows1(&[1, 5]));

    // EXCEPT ALL: max(0, l - r) per group, unmatched groups kept whole.
    let plan = compile(&catalog, &setop_tree(SetOpKind::Except, false));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1, 1, 2]));

    // EXCEPT DISTINCT caps every multiplicity at one.
    let plan = compile(&catalog, &setop_tree(SetOpKind::Except, true));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[2]));

    // INTERSECT ALL: min(l, r), matched groups only.
    let plan = compile(&catalog, &setop_tree(SetOpKind::Intersect, false));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1]));

    let plan = compile(&catalog, &setop_tree(SetOpKind::Intersect, true));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1]));
}

#[test]
fn set_operations_match_nulls() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a"]));
    catalog.add_table(int_table("r", &["a"]));
    let mut db = TestDb::new();
    db.add_table("l", 1, vec![vec![ScalarValue::Null], vec![i(1)]]);
    db.add_table("r", 1, vec![vec![ScalarValue::Null]]);

    let plan = compile(&catalog, &setop_tree(SetOpKind::Intersect, false));
    assert_eq!(
        run_rows(&catalog, &plan, &mut db).unwrap(),
        vec![vec![ScalarValue::Null]]
    );

    let plan = compile(&catalog, &setop_tree(SetOpKind::Except, false));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1]));
}

#[test]
fn set_operation_arity_mismatch() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("l", &["a", "b"]));
    catalog.add_table(int_table("r", &["a", "b"]));

    let mut tree = PlanTree::new();
    let l = scan(&mut tree, "l");
    let lp = project(&mut tree, l, vec![out(col("l", "a"), "a")]);
    let r = scan(&mut tree, "r");
    let rp = project(
        &mut tree,
        r,
        vec![out(col("r", "a"), "a"), out(col("r", "b"), "b")],
    );
    tree.push_root(RelNode::new(RelOp::SetOp(SetOp {
        kind: SetOpKind::Union,
        left: lp,
        right: rp,
    })));

    let err = StatementPlanner::plan(&catalog, &tree, PlanConfig::default()).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::Semantic);
    assert_eq!(err.msg, "set operation arity mismatch: 1 vs 2 columns");
}

// --- top-n and sampling ---

#[test]
fn ordered_top_n_folds_offset() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[5, 1, 3, 2, 4]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = ordered_project(
        &mut tree,
        s,
        vec![out(col("t", "a"), "a")],
        vec![asc(col("t", "a"))],
    );
    tree.push_root(RelNode::new(RelOp::TopN(TopN {
        input: p,
        limit: Some(lit(2)),
        offset: Some(lit(1)),
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, rows1(&[2, 3]));
}

#[test]
fn ordered_top_n_refines_ties_across_keys() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a", "b"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 10), (2, 10), (3, 20)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = ordered_project(
        &mut tree,
        s,
        vec![out(col("t", "a"), "a")],
        vec![asc(col("t", "b")), desc(col("t", "a"))],
    );
    tree.push_root(RelNode::new(RelOp::TopN(TopN {
        input: p,
        limit: Some(lit(2)),
        offset: None,
    })));

    // The partial step on b keeps the full tie run; the final step on a
    // resolves it.
    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, rows1(&[2, 1]));
}

#[test]
fn limit_without_order_keeps_leading_rows() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[7, 8, 9]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let top = tree.push(RelNode::new(RelOp::TopN(TopN {
        input: s,
        limit: Some(lit(2)),
        offset: None,
    })));
    let p = project(&mut tree, top, vec![out(col("t", "a"), "a")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[7, 8]));
}

#[test]
fn offset_without_limit_skips_rows() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[5, 1, 3]));

    // Unordered: drop the first stored row, keep the rest.
    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let top = tree.push(RelNode::new(RelOp::TopN(TopN {
        input: s,
        limit: None,
        offset: Some(lit(1)),
    })));
    let p = project(&mut tree, top, vec![out(col("t", "a"), "a")]);
    tree.root = Some(p);
    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1, 3]));

    // Ordered: skip the smallest value.
    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = ordered_project(
        &mut tree,
        s,
        vec![out(col("t", "a"), "a")],
        vec![asc(col("t", "a"))],
    );
    tree.push_root(RelNode::new(RelOp::TopN(TopN {
        input: p,
        limit: None,
        offset: Some(lit(1)),
    })));
    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[3, 5]));
}

#[test]
fn seeded_sample_is_deterministic() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let smp = tree.push(RelNode::new(RelOp::Sample(Sample {
        input: s,
        size: lit(3),
        seed: Some(7),
    })));
    let p = project(&mut tree, smp, vec![out(col("t", "a"), "a")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let mut again = db.clone();
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert!(matches!(&row[0], ScalarValue::Int64(v) if (0..10).contains(v)));
    }
    assert_eq!(rows, run_rows(&catalog, &plan, &mut again).unwrap());
}

// --- expressions ---

#[test]
fn in_list_small_large_and_negated() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table(
        "t",
        1,
        vec![
            vec![i(1)],
            vec![i(2)],
            vec![i(3)],
            vec![i(4)],
            vec![i(5)],
            vec![ScalarValue::Null],
        ],
    );

    let query = |list: Vec<Expression>, negated: bool| {
        let mut tree = PlanTree::new();
        let s = scan(&mut tree, "t");
        let f = filter(&mut tree, s, vec![in_list(col("t", "a"), list, negated)]);
        let p = project(&mut tree, f, vec![out(col("t", "a"), "a")]);
        tree.root = Some(p);
        tree
    };

    // Small list expands to chained selects.
    let tree = query(vec![lit(2), lit(4)], false);
    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[2, 4]));

    // Sixteen literals cross the materialization threshold; same rows.
    let mut big: Vec<Expression> = vec![lit(2), lit(4)];
    big.extend((100..114).map(lit));
    let tree = query(big, false);
    let plan = compile(&catalog, &tree);
    assert!(format_plan(&plan).contains("semijoin("));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[2, 4]));

    // NOT IN with a null element matches nothing.
    let tree = query(vec![lit(2), null_lit()], true);
    let plan = compile(&catalog, &tree);
    assert!(run_rows(&catalog, &plan, &mut db).unwrap().is_empty());

    // NOT IN drops null probes.
    let tree = query(vec![lit(2)], true);
    let plan = compile(&catalog, &tree);
    assert_eq!(
        run_rows(&catalog, &plan, &mut db).unwrap(),
        rows1(&[1, 3, 4, 5])
    );
}

#[test]
fn case_and_coalesce_scatter_branchwise() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, vec![vec![i(1)], vec![i(2)], vec![ScalarValue::Null]]);

    let case = Expression::Case(CaseExpr {
        branches: vec![
            (eq(col("t", "a"), lit(1)), lit(10)),
            (eq(col("t", "a"), lit(2)), lit(20)),
        ],
        otherwise: Some(Box::new(lit(0))),
        datatype: DataType::Int64,
    });
    let coalesce = Expression::Coalesce(CoalesceExpr {
        exprs: vec![col("t", "a"), lit(99)],
        datatype: DataType::Int64,
    });

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = project(&mut tree, s, vec![out(case, "c"), out(coalesce, "d")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[10, 1]), irow(&[20, 2]), irow(&[0, 99])]);
}

#[test]
fn coalesce_null_literal_falls_through() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["b"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, vec![vec![i(7)], vec![ScalarValue::Null]]);

    // A null scalar argument settles no rows; later arguments still apply.
    let coalesce = Expression::Coalesce(CoalesceExpr {
        exprs: vec![null_lit(), col("t", "b"), lit(5)],
        datatype: DataType::Int64,
    });
    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = project(&mut tree, s, vec![out(coalesce, "d")]);
    tree.root = Some(p);

    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[7, 5]));
}

#[test]
fn single_flag_enforces_cardinality() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = tree.push(
        RelNode::new(RelOp::Project(Project {
            input: s,
            exprs: vec![out(col("t", "a"), "a")],
            order: Vec::new(),
        }))
        .with_single(),
    );
    tree.root = Some(p);
    let plan = compile(&catalog, &tree);

    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[42]));
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[42]));

    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[1, 2]));
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::Cardinality);
    assert_eq!(err.msg, "cardinality violation, scalar expression expected");
}

// --- plan walker ---

#[test]
fn shared_subplans_compile_once() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let f1 = filter(&mut tree, s, vec![cmp(CmpOp::Gt, col("t", "a"), lit(1))]);
    let p1 = project(&mut tree, f1, vec![out(col("t", "a"), "a")]);
    let f2 = filter(&mut tree, s, vec![cmp(CmpOp::Lt, col("t", "a"), lit(5))]);
    let p2 = project(&mut tree, f2, vec![out(col("t", "a"), "a")]);
    tree.push_root(RelNode::new(RelOp::SetOp(SetOp {
        kind: SetOpKind::Union,
        left: p1,
        right: p2,
    })));

    let plan = compile(&catalog, &tree);
    let rendered = format_plan(&plan);
    assert_eq!(rendered.matches("table_ids(").count(), 1);

    // Recompiling yields a structurally identical graph.
    let again = compile(&catalog, &tree);
    assert_eq!(rendered, format_plan(&again));
}

#[test]
fn depth_guard_rejects_deep_trees() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));

    let mut tree = PlanTree::new();
    let mut prev = scan(&mut tree, "t");
    for _ in 0..20 {
        prev = filter(&mut tree, prev, Vec::new());
    }
    tree.root = Some(prev);

    let config = PlanConfig {
        max_depth: 8,
        ..PlanConfig::default()
    };
    let err = StatementPlanner::plan(&catalog, &tree, config).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ResourceExhausted);
    assert_eq!(err.msg, "Query too complex: running out of stack space");
}

// --- insert ---

#[test]
fn insert_appends_rows() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);
    let mut p = int_table("p", &["id"]);
    p.columns[0].nullable = false;
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    db.add_table("p", 1, rows1(&[1, 2]));

    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![lit(3)]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: vals,
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("p").unwrap(), rows1(&[1, 2, 3]));
}

#[test]
fn insert_rejects_null_in_not_null_column() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);
    let mut p = int_table("p", &["id"]);
    p.columns[0].nullable = false;
    catalog.add_table(p);
    db.add_table("p", 1, Vec::new());

    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![null_lit()]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: vals,
    })));

    let plan = compile(&catalog, &tree);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(
        err.msg,
        "INSERT INTO: NOT NULL constraint violated for column 'p.id'"
    );
    assert!(db.rows("p").unwrap().is_empty());
}

#[test]
fn insert_rejects_duplicate_keys() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    catalog.add_table(int_table("src", &["v"]));
    db.add_table("p", 1, rows1(&[1, 2]));
    db.add_table("src", 1, rows1(&[7, 7]));

    // Phase one: clash with a stored row.
    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![lit(2)]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: vals,
    })));
    let plan = compile(&catalog, &tree);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(err.msg, "INSERT INTO: PRIMARY KEY constraint 'p.p_pk' violated");

    // Phase two: duplicates within the inserted batch itself.
    let mut tree = PlanTree::new();
    let src = scan(&mut tree, "src");
    let sel = project(&mut tree, src, vec![out(col("src", "v"), "id")]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: sel,
    })));
    let plan = compile(&catalog, &tree);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.msg, "INSERT INTO: PRIMARY KEY constraint 'p.p_pk' violated");
    assert_eq!(db.rows("p").unwrap(), rows1(&[1, 2]));
}

#[test]
fn insert_checks_foreign_keys_with_null_exemption() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    let mut c = int_table("c", &["id", "pid"]);
    c.keys.push(pk("c_pk", vec![0]));
    c.foreign_keys.push(fk(
        "c_fk",
        vec![1],
        "p",
        "p_pk",
        FkAction::Restrict,
        FkAction::Restrict,
    ));
    catalog.add_table(c);
    db.add_table("p", 1, rows1(&[1]));
    db.add_table("c", 2, Vec::new());

    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![lit(1), lit(99)]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "c".to_string(),
        input: vals,
    })));
    let plan = compile(&catalog, &tree);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(err.msg, "INSERT INTO: FOREIGN KEY constraint 'c.c_fk' violated");

    // A null key part exempts the row under MATCH SIMPLE.
    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![lit(2), null_lit()]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "c".to_string(),
        input: vals,
    })));
    let plan = compile(&catalog, &tree);
    run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(db.rows("c").unwrap(), vec![vec![i(2), ScalarValue::Null]]);
}

#[test]
fn after_insert_trigger_sees_new_rows() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);

    let mut body = PlanTree::new();
    let new_rows = scan(&mut body, "n");
    let proj = project(&mut body, new_rows, vec![out(col("n", "id"), "val")]);
    body.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "audit".to_string(),
        input: proj,
    })));

    let mut t = int_table("t", &["id"]);
    t.triggers.push(TriggerEntry {
        name: "t_audit".to_string(),
        event: TriggerEvent::Insert,
        timing: TriggerTiming::After,
        old_alias: None,
        new_alias: Some("n".to_string()),
        body,
    });
    catalog.add_table(t);
    catalog.add_table(int_table("audit", &["val"]));
    db.add_table("t", 1, Vec::new());
    db.add_table("audit", 1, Vec::new());

    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let vals = values_row(&mut tree, dual, vec![lit(42)]);
    tree.push_root(RelNode::new(RelOp::Insert(Insert {
        table: "t".to_string(),
        input: vals,
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("t").unwrap(), rows1(&[42]));
    assert_eq!(db.rows("audit").unwrap(), rows1(&[42]));
}

// --- update ---

fn tid_project(tree: &mut PlanTree, table: &str, input: RelId, extra: Vec<NamedExpr>) -> RelId {
    let mut exprs = vec![NamedExpr::new(col(table, TID_COLUMN), table, "tid")];
    exprs.extend(extra);
    project(tree, input, exprs)
}

#[test]
fn update_assigns_values() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a", "b"]));
    let mut db = TestDb::new();
    db.add_table("t", 2, rows2(&[(1, 10), (2, 20), (3, 30)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let f = filter(&mut tree, s, vec![eq(col("t", "a"), lit(2))]);
    let input = tid_project(&mut tree, "t", f, vec![out(lit(99), "v")]);
    tree.push_root(RelNode::new(RelOp::Update(Update {
        table: "t".to_string(),
        input,
        columns: vec!["b".to_string()],
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(
        db.rows("t").unwrap(),
        rows2(&[(1, 10), (2, 99), (3, 30)])
    );
}

#[test]
fn update_cascades_key_change() {
    let mut catalog = Catalog::new();
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    let mut c = int_table("c", &["cid", "pid"]);
    c.keys.push(pk("c_pk", vec![0]));
    c.foreign_keys.push(fk(
        "c_fk",
        vec![1],
        "p",
        "p_pk",
        FkAction::Cascade,
        FkAction::Cascade,
    ));
    catalog.add_table(c);
    let mut db = TestDb::new();
    db.add_table("p", 1, rows1(&[1, 2]));
    db.add_table("c", 2, rows2(&[(10, 1), (11, 2)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "p");
    let f = filter(&mut tree, s, vec![eq(col("p", "id"), lit(1))]);
    let input = tid_project(&mut tree, "p", f, vec![out(lit(5), "v")]);
    tree.push_root(RelNode::new(RelOp::Update(Update {
        table: "p".to_string(),
        input,
        columns: vec!["id".to_string()],
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("p").unwrap(), rows1(&[5, 2]));
    assert_eq!(db.rows("c").unwrap(), rows2(&[(10, 5), (11, 2)]));
}

#[test]
fn update_restricted_by_referencing_rows() {
    let mut catalog = Catalog::new();
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    let mut c = int_table("c", &["cid", "pid"]);
    c.foreign_keys.push(fk(
        "c_fk",
        vec![1],
        "p",
        "p_pk",
        FkAction::Restrict,
        FkAction::Restrict,
    ));
    catalog.add_table(c);
    let mut db = TestDb::new();
    db.add_table("p", 1, rows1(&[1, 2]));
    db.add_table("c", 2, rows2(&[(10, 1)]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "p");
    let f = filter(&mut tree, s, vec![eq(col("p", "id"), lit(1))]);
    let input = tid_project(&mut tree, "p", f, vec![out(lit(5), "v")]);
    tree.push_root(RelNode::new(RelOp::Update(Update {
        table: "p".to_string(),
        input,
        columns: vec!["id".to_string()],
    })));

    let plan = compile(&catalog, &tree);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(err.msg, "UPDATE: FOREIGN KEY constraint 'c.c_fk' violated");
}

// --- delete and truncate ---

fn delete_where(catalog: &Catalog, table: &str, column: &str, value: i64) -> CompiledPlan {
    let mut tree = PlanTree::new();
    let s = scan(&mut tree, table);
    let f = filter(&mut tree, s, vec![eq(col(table, column), lit(value))]);
    let input = tid_project(&mut tree, table, f, Vec::new());
    tree.push_root(RelNode::new(RelOp::Delete(Delete {
        table: table.to_string(),
        input: Some(input),
    })));
    compile(catalog, &tree)
}

#[test]
fn deleted_rows_disappear_from_scans() {
    let mut catalog = Catalog::new();
    catalog.add_table(int_table("t", &["a"]));
    let mut db = TestDb::new();
    db.add_table("t", 1, rows1(&[1, 2, 3]));

    let plan = delete_where(&catalog, "t", "a", 2);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("t").unwrap(), rows1(&[1, 3]));

    let mut tree = PlanTree::new();
    let s = scan(&mut tree, "t");
    let p = project(&mut tree, s, vec![out(col("t", "a"), "a")]);
    tree.root = Some(p);
    let plan = compile(&catalog, &tree);
    assert_eq!(run_rows(&catalog, &plan, &mut db).unwrap(), rows1(&[1, 3]));
}

#[test]
fn delete_cascades_through_chain() {
    let mut catalog = Catalog::new();
    let mut a = int_table("a", &["id"]);
    a.keys.push(pk("a_pk", vec![0]));
    catalog.add_table(a);
    let mut b = int_table("b", &["bid", "aid"]);
    b.keys.push(pk("b_pk", vec![0]));
    b.foreign_keys.push(fk(
        "b_fk",
        vec![1],
        "a",
        "a_pk",
        FkAction::Cascade,
        FkAction::Cascade,
    ));
    catalog.add_table(b);
    let mut c = int_table("c", &["cid", "bid"]);
    c.foreign_keys.push(fk(
        "c_fk",
        vec![1],
        "b",
        "b_pk",
        FkAction::Cascade,
        FkAction::Cascade,
    ));
    catalog.add_table(c);
    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1, 2]));
    db.add_table("b", 2, rows2(&[(10, 1), (11, 2)]));
    db.add_table("c", 2, rows2(&[(100, 10), (101, 11)]));

    let plan = delete_where(&catalog, "a", "id", 1);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("a").unwrap(), rows1(&[2]));
    assert_eq!(db.rows("b").unwrap(), rows2(&[(11, 2)]));
    assert_eq!(db.rows("c").unwrap(), rows2(&[(101, 11)]));
}

#[test]
fn identically_named_foreign_keys_cascade_separately() {
    let mut catalog = Catalog::new();
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    // Constraint names are only unique per table; both children reuse one.
    for child in ["c1", "c2"] {
        let mut c = int_table(child, &["cid", "pid"]);
        c.foreign_keys.push(fk(
            "ref_fk",
            vec![1],
            "p",
            "p_pk",
            FkAction::Cascade,
            FkAction::Cascade,
        ));
        catalog.add_table(c);
    }
    let mut db = TestDb::new();
    db.add_table("p", 1, rows1(&[1]));
    db.add_table("c1", 2, rows2(&[(10, 1)]));
    db.add_table("c2", 2, rows2(&[(20, 1)]));

    let plan = delete_where(&catalog, "p", "id", 1);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert!(db.rows("p").unwrap().is_empty());
    assert!(db.rows("c1").unwrap().is_empty());
    assert!(db.rows("c2").unwrap().is_empty());
}

#[test]
fn delete_restricted_by_referencing_rows() {
    let mut catalog = Catalog::new();
    let mut a = int_table("a", &["id"]);
    a.keys.push(pk("a_pk", vec![0]));
    catalog.add_table(a);
    let mut b = int_table("b", &["bid", "aid"]);
    b.foreign_keys.push(fk(
        "b_fk",
        vec![1],
        "a",
        "a_pk",
        FkAction::Restrict,
        FkAction::Restrict,
    ));
    catalog.add_table(b);
    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1, 2]));
    db.add_table("b", 2, rows2(&[(10, 1)]));

    // Unreferenced rows delete fine.
    let plan = delete_where(&catalog, "a", "id", 2);
    run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(db.rows("a").unwrap(), rows1(&[1]));

    let plan = delete_where(&catalog, "a", "id", 1);
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(err.msg, "DELETE: FOREIGN KEY constraint 'b.b_fk' violated");
}

#[test]
fn delete_sets_referencing_columns_null() {
    let mut catalog = Catalog::new();
    let mut a = int_table("a", &["id"]);
    a.keys.push(pk("a_pk", vec![0]));
    catalog.add_table(a);
    let mut b = int_table("b", &["bid", "aid"]);
    b.foreign_keys.push(fk(
        "b_fk",
        vec![1],
        "a",
        "a_pk",
        FkAction::Restrict,
        FkAction::SetNull,
    ));
    catalog.add_table(b);
    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1]));
    db.add_table("b", 2, rows2(&[(10, 1)]));

    let plan = delete_where(&catalog, "a", "id", 1);
    run_rows(&catalog, &plan, &mut db).unwrap();
    assert!(db.rows("a").unwrap().is_empty());
    assert_eq!(db.rows("b").unwrap(), vec![vec![i(10), ScalarValue::Null]]);
}

#[test]
fn truncate_cascade_clears_children_first() {
    let mut catalog = Catalog::new();
    let mut a = int_table("a", &["id"]);
    a.keys.push(pk("a_pk", vec![0]));
    catalog.add_table(a);
    let mut b = int_table("b", &["bid", "aid"]);
    b.foreign_keys.push(fk(
        "b_fk",
        vec![1],
        "a",
        "a_pk",
        FkAction::Cascade,
        FkAction::Cascade,
    ));
    catalog.add_table(b);
    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1, 2]));
    db.add_table("b", 2, rows2(&[(10, 1)]));

    let mut tree = PlanTree::new();
    tree.push_root(RelNode::new(RelOp::Truncate(Truncate {
        table: "a".to_string(),
        cascade: true,
    })));
    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[2])]);
    assert!(db.rows("a").unwrap().is_empty());
    assert!(db.rows("b").unwrap().is_empty());
}

#[test]
fn truncate_restricted_by_live_references() {
    let mut catalog = Catalog::new();
    let mut a = int_table("a", &["id"]);
    a.keys.push(pk("a_pk", vec![0]));
    catalog.add_table(a);
    let mut b = int_table("b", &["bid", "aid"]);
    b.foreign_keys.push(fk(
        "b_fk",
        vec![1],
        "a",
        "a_pk",
        FkAction::Restrict,
        FkAction::Restrict,
    ));
    catalog.add_table(b);

    let mut tree = PlanTree::new();
    tree.push_root(RelNode::new(RelOp::Truncate(Truncate {
        table: "a".to_string(),
        cascade: false,
    })));
    let plan = compile(&catalog, &tree);

    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1]));
    db.add_table("b", 2, rows2(&[(10, 1)]));
    let err = run_rows(&catalog, &plan, &mut db).unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::ConstraintViolation);
    assert_eq!(err.msg, "TRUNCATE: FOREIGN KEY constraint 'b.b_fk' violated");

    // All-null references do not block truncation.
    let mut db = TestDb::new();
    db.add_table("a", 1, rows1(&[1]));
    db.add_table("b", 2, vec![vec![i(10), ScalarValue::Null]]);
    run_rows(&catalog, &plan, &mut db).unwrap();
    assert!(db.rows("a").unwrap().is_empty());
    assert_eq!(db.rows("b").unwrap().len(), 1);
}

// --- statement lists ---

#[test]
fn ddl_list_runs_every_part() {
    let mut catalog = Catalog::new();
    let mut db = TestDb::new();
    add_dual(&mut catalog, &mut db);
    let mut p = int_table("p", &["id"]);
    p.keys.push(pk("p_pk", vec![0]));
    catalog.add_table(p);
    db.add_table("p", 1, Vec::new());

    let mut tree = PlanTree::new();
    let dual = scan(&mut tree, "dual");
    let v1 = values_row(&mut tree, dual, vec![lit(1)]);
    let ins1 = tree.push(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: v1,
    })));
    let v2 = values_row(&mut tree, dual, vec![lit(2)]);
    let ins2 = tree.push(RelNode::new(RelOp::Insert(Insert {
        table: "p".to_string(),
        input: v2,
    })));
    tree.push_root(RelNode::new(RelOp::Ddl(DdlList {
        parts: vec![ins1, ins2],
    })));

    let plan = compile(&catalog, &tree);
    let rows = run_rows(&catalog, &plan, &mut db).unwrap();
    assert_eq!(rows, vec![irow(&[1])]);
    assert_eq!(db.rows("p").unwrap(), rows1(&[1, 2]));
}
