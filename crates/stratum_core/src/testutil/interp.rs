//! Reference interpreter for compiled statement graphs. Column-at-a-time,
//! no optimization; every statement evaluates in emission order, including
//! side-effecting ones.

use std::cmp::Ordering;

use rand::SeedableRng;
use rand::rngs::StdRng;
use stratum_error::{DbError, DbErrorKind, Result};

use super::storage::TestDb;
use crate::arrays::scalar::{ScalarValue, combined_hash_bits, hash_value, rotate_xor_hash};
use crate::arrays::datatype::DataType;
use crate::catalog::Catalog;
use crate::plan::expr::{AggrFunc, CmpOp, ScalarFunc};
use crate::statements::ops::StatementOp;
use crate::statements::{CompiledPlan, StmtId};

/// Runtime value of one statement.
#[derive(Debug, Clone)]
pub enum Value {
    Scalar(ScalarValue),
    Col(Vec<ScalarValue>),
    /// Row-position sequence (candidate set or join side).
    Ids(Vec<usize>),
    /// Outputs of a multi-output statement, addressed by `NthResult`.
    Multi(Vec<Value>),
}

impl Value {
    fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Col(v) => v.len(),
            Value::Ids(v) => v.len(),
            Value::Multi(_) => 0,
        }
    }
}

/// Execute a compiled plan against the store. Returns every statement's
/// value, indexed by statement id.
pub fn run(catalog: &Catalog, plan: &CompiledPlan, db: &mut TestDb) -> Result<Vec<Value>> {
    let mut interp = Interp {
        catalog,
        db,
        values: Vec::with_capacity(plan.graph.len()),
    };
    for (_, stmt) in plan.graph.iter() {
        let value = interp.eval(&stmt.op)?;
        interp.values.push(value);
    }
    Ok(interp.values)
}

/// Execute a plan and materialize its declared output columns as rows.
pub fn run_rows(
    catalog: &Catalog,
    plan: &CompiledPlan,
    db: &mut TestDb,
) -> Result<Vec<Vec<ScalarValue>>> {
    let values = run(catalog, plan, db)?;
    let mut cols: Vec<Vec<ScalarValue>> = Vec::with_capacity(plan.outputs.len());
    for out in &plan.outputs {
        match &values[out.id.0 as usize] {
            Value::Scalar(v) => cols.push(vec![v.clone()]),
            Value::Col(v) => cols.push(v.clone()),
            Value::Ids(v) => cols.push(v.iter().map(|&i| ScalarValue::Int64(i as i64)).collect()),
            Value::Multi(_) => {
                return Err(DbError::new(format!(
                    "output {} is a multi-output statement",
                    out.id
                )));
            }
        }
    }
    let nrows = cols.iter().map(Vec::len).max().unwrap_or(0);
    let mut rows = Vec::with_capacity(nrows);
    for i in 0..nrows {
        rows.push(
            cols.iter()
                .map(|c| {
                    if c.len() == 1 {
                        c[0].clone()
                    } else {
                        c[i].clone()
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

struct Interp<'a> {
    catalog: &'a Catalog,
    db: &'a mut TestDb,
    values: Vec<Value>,
}

/// Three-valued comparison; `None` is unknown.
fn cmp3(op: CmpOp, a: &ScalarValue, b: &ScalarValue, is_semantics: bool) -> Option<bool> {
    if a.is_null() || b.is_null() {
        if is_semantics {
            return match op {
                CmpOp::Eq => Some(a.is_null() && b.is_null()),
                CmpOp::NotEq => Some(!(a.is_null() && b.is_null())),
                _ => None,
            };
        }
        return None;
    }
    let ord = compare(a, b)?;
    Some(match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::NotEq => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::LtEq => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::GtEq => ord != Ordering::Less,
    })
}

fn compare(a: &ScalarValue, b: &ScalarValue) -> Option<Ordering> {
    use ScalarValue::*;
    match (a, b) {
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (Utf8(x), Utf8(y)) => Some(x.cmp(y)),
        (Float64(x), Float64(y)) => x.partial_cmp(y),
        (Int32(_) | Int64(_), Int32(_) | Int64(_)) => {
            Some(a.try_as_i64()?.cmp(&b.try_as_i64()?))
        }
        (Float64(x), Int32(_) | Int64(_)) => x.partial_cmp(&(b.try_as_i64()? as f64)),
        (Int32(_) | Int64(_), Float64(y)) => (a.try_as_i64()? as f64).partial_cmp(y),
        _ => None,
    }
}

/// Sort key wrapper applying direction and null placement.
fn sort_cmp(a: &ScalarValue, b: &ScalarValue, desc: bool, nulls_last: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if nulls_last {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if nulls_last {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {
            let ord = compare(a, b).unwrap_or(Ordering::Equal);
            if desc { ord.reverse() } else { ord }
        }
    }
}

impl Interp<'_> {
    fn value(&self, id: StmtId) -> Result<&Value> {
        self.values
            .get(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("forward reference to {id}")))
    }

    fn col(&self, id: StmtId) -> Result<&[ScalarValue]> {
        match self.value(id)? {
            Value::Col(v) => Ok(v),
            other => Err(DbError::new(format!(
                "{id}: expected column, got {other:?}"
            ))),
        }
    }

    fn ids(&self, id: StmtId) -> Result<&[usize]> {
        match self.value(id)? {
            Value::Ids(v) => Ok(v),
            other => Err(DbError::new(format!("{id}: expected ids, got {other:?}"))),
        }
    }

    fn scalar(&self, id: StmtId) -> Result<&ScalarValue> {
        match self.value(id)? {
            Value::Scalar(v) => Ok(v),
            other => Err(DbError::new(format!(
                "{id}: expected scalar, got {other:?}"
            ))),
        }
    }

    fn scalar_i64(&self, id: StmtId) -> Result<i64> {
        self.scalar(id)?
            .try_as_i64()
            .ok_or_else(|| DbError::new(format!("{id}: expected integer scalar")))
    }

    /// Value column of a statement, admitting id sequences as integer
    /// columns (row ids are ordinary values to sorts, groups and joins).
    fn scalars(&self, id: StmtId) -> Result<Vec<ScalarValue>> {
        match self.value(id)? {
            Value::Col(v) => Ok(v.clone()),
            Value::Ids(v) => Ok(v.iter().map(|&i| ScalarValue::Int64(i as i64)).collect()),
            Value::Scalar(v) => Ok(vec![v.clone()]),
            Value::Multi(_) => Err(DbError::new(format!("{id}: expected column values"))),
        }
    }

    /// Candidate domain of a select-like statement.
    fn domain(&self, input_len: usize, cand: Option<StmtId>) -> Result<Vec<usize>> {
        match cand {
            Some(cand) => Ok(self.ids(cand)?.to_vec()),
            None => Ok((0..input_len).collect()),
        }
    }

    /// `value` operand of a select: scalar broadcast or a column aligned with
    /// the candidate domain.
    fn select_value<'v>(
        &'v self,
        id: StmtId,
        domain_pos: usize,
    ) -> Result<&'v ScalarValue> {
        match self.value(id)? {
            Value::Scalar(v) => Ok(v),
            Value::Col(v) => v.get(domain_pos).ok_or_else(|| {
                DbError::new(format!("{id}: comparison column shorter than domain"))
            }),
            other => Err(DbError::new(format!(
                "{id}: expected scalar or column, got {other:?}"
            ))),
        }
    }

    fn eval(&mut self, op: &StatementOp) -> Result<Value> {
        match op {
            StatementOp::Literal { value } => Ok(Value::Scalar(value.clone())),
            StatementOp::ValueList { values } => Ok(Value::Col(values.clone())),
            StatementOp::BaseColumn { table, column } => {
                let entry = self.catalog.table(table)?;
                let pos = entry.column_position(column)?;
                let data = self.db.table(table)?;
                Ok(Value::Col(data.columns[pos].clone()))
            }
            StatementOp::TableIds { table } => {
                Ok(Value::Ids(self.db.table(table)?.live_positions()))
            }
            StatementOp::ConstColumn { head, value } => {
                let len = self.value(*head)?.len();
                let v = self.scalar(*value)?.clone();
                Ok(Value::Col(vec![v; len]))
            }
            StatementOp::Mirror { input } => {
                Ok(Value::Ids((0..self.value(*input)?.len()).collect()))
            }
            StatementOp::Project { ids, values } => {
                let ids = self.ids(*ids)?;
                match self.value(*values)? {
                    Value::Col(v) => {
                        Ok(Value::Col(ids.iter().map(|&i| v[i].clone()).collect()))
                    }
                    Value::Ids(v) => Ok(Value::Ids(ids.iter().map(|&i| v[i]).collect())),
                    other => Err(DbError::new(format!(
                        "project over non-column {other:?}"
                    ))),
                }
            }
            StatementOp::Append { left, right } => match (self.value(*left)?, self.value(*right)?) {
                (Value::Col(l), Value::Col(r)) => {
                    let mut out = l.clone();
                    out.extend(r.iter().cloned());
                    Ok(Value::Col(out))
                }
                (Value::Ids(l), Value::Ids(r)) => {
                    let mut out = l.clone();
                    out.extend(r.iter().copied());
                    Ok(Value::Ids(out))
                }
                _ => Err(DbError::new("append over mixed value kinds")),
            },
            StatementOp::Replace {
                target,
                ids,
                values,
            } => {
                let mut out = self.col(*target)?.to_vec();
                let ids = self.ids(*ids)?;
                let values = self.col(*values)?;
                for (&pos, v) in ids.iter().zip(values) {
                    out[pos] = v.clone();
                }
                Ok(Value::Col(out))
            }
            StatementOp::Expand { extent, counts } => {
                let extent = self.ids(*extent)?;
                let counts = self.col(*counts)?;
                let mut out = Vec::new();
                for (&pos, count) in extent.iter().zip(counts) {
                    let n = count.try_as_i64().unwrap_or(0).max(0) as usize;
                    out.extend(std::iter::repeat_n(pos, n));
                }
                Ok(Value::Ids(out))
            }
            StatementOp::SelectCmp {
                input,
                op,
                value,
                value2,
                cand,
                anti,
                is_semantics,
            } => {
                let col = self.scalars(*input)?;
                let domain = self.domain(col.len(), *cand)?;
                let mut out = Vec::new();
                for (pos, &id) in domain.iter().enumerate() {
                    let v = &col[id];
                    let low = self.select_value(*value, pos)?;
                    let mut pass = cmp3(*op, v, low, *is_semantics);
                    if let Some(value2) = value2 {
                        let high = self.select_value(*value2, pos)?;
                        let upper = cmp3(CmpOp::LtEq, v, high, *is_semantics);
                        pass = match (pass, upper) {
                            (Some(a), Some(b)) => Some(a && b),
                            _ => None,
                        };
                    }
                    let keep = if *anti {
                        pass == Some(false)
                    } else {
                        pass == Some(true)
                    };
                    if keep {
                        out.push(id);
                    }
                }
                Ok(Value::Ids(out))
            }
            StatementOp::Join {
                left,
                right,
                op,
                is_semantics,
            } => {
                let l = self.scalars(*left)?;
                let r = self.scalars(*right)?;
                let mut jl = Vec::new();
                let mut jr = Vec::new();
                for (i, lv) in l.iter().enumerate() {
                    for (j, rv) in r.iter().enumerate() {
                        if cmp3(*op, lv, rv, *is_semantics) == Some(true) {
                            jl.push(i);
                            jr.push(j);
                        }
                    }
                }
                Ok(Value::Multi(vec![Value::Ids(jl), Value::Ids(jr)]))
            }
            StatementOp::CrossJoin { left, right } => {
                let nl = self.value(*left)?.len();
                let nr = self.value(*right)?.len();
                let mut jl = Vec::with_capacity(nl * nr);
                let mut jr = Vec::with_capacity(nl * nr);
                for i in 0..nl {
                    for j in 0..nr {
                        jl.push(i);
                        jr.push(j);
                    }
                }
                Ok(Value::Multi(vec![Value::Ids(jl), Value::Ids(jr)]))
            }
            StatementOp::IndexJoin { probe, table, key } => {
                let probes = self.col(*probe)?.to_vec();
                let entry = self.catalog.table(table)?;
                let key = entry.key(key)?;
                let data = self.db.table(table)?;
                let bits = combined_hash_bits(key.columns.len());
                let mut jl = Vec::new();
                let mut jr = Vec::new();
                for (live_idx, pos) in data.live_positions().into_iter().enumerate() {
                    let mut acc = hash_value(&data.columns[key.columns[0]][pos]);
                    for &col in &key.columns[1..] {
                        acc = rotate_xor_hash(acc, bits, &data.columns[col][pos]);
                    }
                    for (i, p) in probes.iter().enumerate() {
                        if p.try_as_i64() == Some(acc as i64) {
                            jl.push(i);
                            jr.push(live_idx);
                        }
                    }
                }
                Ok(Value::Multi(vec![Value::Ids(jl), Value::Ids(jr)]))
            }
            StatementOp::NthResult { input, index } => match self.value(*input)? {
                Value::Multi(parts) => parts
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| DbError::new("result index out of bounds")),
                other => Err(DbError::new(format!(
                    "nth_result over single-output {other:?}"
                ))),
            },
            StatementOp::Tunion { left, right } => {
                let mut out: Vec<usize> = self.ids(*left)?.to_vec();
                out.extend(self.ids(*right)?);
                out.sort_unstable();
                out.dedup();
                Ok(Value::Ids(out))
            }
            StatementOp::Tdiff { left, right } => {
                let right = self.ids(*right)?;
                let out = self
                    .ids(*left)?
                    .iter()
                    .copied()
                    .filter(|id| !right.contains(id))
                    .collect();
                Ok(Value::Ids(out))
            }
            StatementOp::Tinter { left, right } => {
                let right = self.ids(*right)?;
                let out = self
                    .ids(*left)?
                    .iter()
                    .copied()
                    .filter(|id| right.contains(id))
                    .collect();
                Ok(Value::Ids(out))
            }
            StatementOp::Semijoin {
                left,
                right,
                cand,
                anti,
            } => {
                let col = self.scalars(*left)?;
                let members = self.scalars(*right)?;
                let domain = self.domain(col.len(), *cand)?;
                let mut out = Vec::new();
                for id in domain {
                    let v = &col[id];
                    if v.is_null() {
                        continue;
                    }
                    let found = members
                        .iter()
                        .any(|m| cmp3(CmpOp::Eq, v, m, false) == Some(true));
                    if found != *anti {
                        out.push(id);
                    }
                }
                Ok(Value::Ids(out))
            }
            StatementOp::Group { input, prev_groups } => self.eval_group(*input, *prev_groups),
            StatementOp::Aggregate {
                func,
                input,
                groups,
                extent,
                skip_nils,
            } => self.eval_aggregate(*func, *input, *groups, *extent, *skip_nils),
            StatementOp::Call { func, inputs } => self.eval_call(*func, inputs),
            StatementOp::Cmp { op, left, right } => {
                let l = self.value(*left)?.clone();
                let r = self.value(*right)?.clone();
                let len = broadcast_len(&[&l, &r]);
                let scalar = matches!((&l, &r), (Value::Scalar(_), Value::Scalar(_)));
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let a = value_at(&l, i)?;
                    let b = value_at(&r, i)?;
                    out.push(match cmp3(*op, a, b, false) {
                        Some(v) => ScalarValue::Boolean(v),
                        None => ScalarValue::Null,
                    });
                }
                if scalar {
                    Ok(Value::Scalar(out.remove(0)))
                } else {
                    Ok(Value::Col(out))
                }
            }
            StatementOp::Cast { input, to } => match self.value(*input)?.clone() {
                Value::Scalar(v) => Ok(Value::Scalar(cast_value(&v, *to))),
                Value::Col(v) => {
                    Ok(Value::Col(v.iter().map(|x| cast_value(x, *to)).collect()))
                }
                other => Err(DbError::new(format!("cast over {other:?}"))),
            },
            StatementOp::Order {
                input,
                prev_ids,
                prev_groups,
                desc,
                nulls_last,
            } => {
                let (ids, groups) = self.ordered(*input, *prev_ids, *prev_groups, *desc, *nulls_last)?;
                let col = self.scalars(*input)?;
                let sorted = ids.iter().map(|&i| col[i].clone()).collect();
                Ok(Value::Multi(vec![
                    Value::Col(sorted),
                    Value::Ids(ids),
                    Value::Ids(groups),
                ]))
            }
            StatementOp::Limit {
                input,
                prev_piv,
                prev_groups,
                count,
                offset,
                desc,
                nulls_last,
                last,
            } => {
                let (ids, groups) =
                    self.ordered(*input, *prev_piv, *prev_groups, *desc, *nulls_last)?;
                let end = (self.scalar_i64(*count)?.max(0) as usize).min(ids.len());
                if *last {
                    let start = match offset {
                        Some(offset) => (self.scalar_i64(*offset)?.max(0) as usize).min(end),
                        None => 0,
                    };
                    return Ok(Value::Ids(ids[start..end].to_vec()));
                }
                // Partial step: keep the bound plus the full tie run of the
                // last kept row.
                let mut cut = end;
                if end > 0 {
                    let last_group = groups[end - 1];
                    while cut < ids.len() && groups[cut] == last_group {
                        cut += 1;
                    }
                }
                Ok(Value::Multi(vec![
                    Value::Ids(ids[..cut].to_vec()),
                    Value::Ids(groups[..cut].to_vec()),
                ]))
            }
            StatementOp::Sample { input, size, seed } => {
                let len = self.value(*input)?.len();
                let amount = (self.scalar_i64(*size)?.max(0) as usize).min(len);
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut picked: Vec<usize> =
                    rand::seq::index::sample(&mut rng, len, amount).into_vec();
                picked.sort_unstable();
                Ok(Value::Ids(picked))
            }
            StatementOp::Alias { input } => Ok(self.value(*input)?.clone()),
            StatementOp::Claim { table, count } => {
                let count = self.scalar_i64(*count)?.max(0) as usize;
                Ok(Value::Ids(self.db.table_mut(table)?.claim(count)))
            }
            StatementOp::AppendCol {
                table,
                column,
                positions,
                values,
            } => {
                let positions = self.ids(*positions)?.to_vec();
                let values = self.col(*values)?.to_vec();
                let pos = self.catalog.table(table)?.column_position(column)?;
                let data = self.db.table_mut(table)?;
                for (p, v) in positions.iter().zip(values) {
                    data.columns[pos][*p] = v;
                }
                Ok(Value::Ids(positions))
            }
            StatementOp::UpdateCol {
                table,
                column,
                rows,
                values,
            } => {
                let rows = self.ids(*rows)?.to_vec();
                let values = self.col(*values)?.to_vec();
                let pos = self.catalog.table(table)?.column_position(column)?;
                let data = self.db.table_mut(table)?;
                for (r, v) in rows.iter().zip(values) {
                    data.columns[pos][*r] = v;
                }
                Ok(Value::Ids(rows))
            }
            StatementOp::DeleteRows { table, rows } => {
                let rows = self.ids(*rows)?.to_vec();
                let data = self.db.table_mut(table)?;
                for &r in &rows {
                    data.live[r] = false;
                }
                Ok(Value::Ids(rows))
            }
            StatementOp::ClearTable { table } => {
                let data = self.db.table_mut(table)?;
                data.live.iter_mut().for_each(|l| *l = false);
                Ok(Value::Scalar(ScalarValue::Null))
            }
            StatementOp::Assert { cond, error } => {
                if self.scalar(*cond)?.try_as_bool() == Some(true) {
                    return Err(DbError::with_kind(error.kind, error.message.clone()));
                }
                Ok(Value::Scalar(ScalarValue::Boolean(false)))
            }
        }
    }

    fn eval_group(&self, input: StmtId, prev_groups: Option<StmtId>) -> Result<Value> {
        let col = self.scalars(input)?;
        let prev: Option<&[usize]> = match prev_groups {
            Some(id) => Some(self.ids(id)?),
            None => None,
        };
        let mut lookup: hashbrown::HashMap<(usize, ScalarValue), usize> = hashbrown::HashMap::new();
        let mut groups = Vec::with_capacity(col.len());
        let mut extent = Vec::new();
        let mut counts: Vec<i64> = Vec::new();
        for (row, value) in col.iter().enumerate() {
            let prev_gid = prev.map(|p| p[row]).unwrap_or(0);
            let gid = *lookup
                .entry((prev_gid, value.clone()))
                .or_insert_with(|| {
                    extent.push(row);
                    counts.push(0);
                    extent.len() - 1
                });
            counts[gid] += 1;
            groups.push(gid);
        }
        Ok(Value::Multi(vec![
            Value::Ids(groups),
            Value::Ids(extent),
            Value::Col(counts.into_iter().map(ScalarValue::Int64).collect()),
        ]))
    }

    fn eval_aggregate(
        &self,
        func: AggrFunc,
        input: Option<StmtId>,
        groups: Option<StmtId>,
        extent: Option<StmtId>,
        skip_nils: bool,
    ) -> Result<Value> {
        match (groups, extent) {
            (Some(groups), Some(extent)) => {
                let ngroups = self.ids(extent)?.len();
                let groups = self.ids(groups)?;
                let mut buckets: Vec<Vec<ScalarValue>> = vec![Vec::new(); ngroups];
                match input {
                    Some(input) => {
                        let rows = self.scalars(input)?;
                        for (row, value) in rows.iter().enumerate() {
                            buckets[groups[row]].push(value.clone());
                        }
                    }
                    None => {
                        for &gid in groups {
                            buckets[gid].push(ScalarValue::Int64(1));
                        }
                    }
                }
                let out = buckets
                    .into_iter()
                    .map(|bucket| aggregate_one(func, &bucket, skip_nils))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Col(out))
            }
            _ => {
                let rows = match input {
                    Some(input) => self.scalars(input)?,
                    None => Vec::new(),
                };
                Ok(Value::Scalar(aggregate_one(func, &rows, skip_nils)?))
            }
        }
    }

    fn eval_call(&self, func: ScalarFunc, inputs: &[StmtId]) -> Result<Value> {
        let args: Vec<Value> = inputs
            .iter()
            .map(|&id| self.value(id).cloned())
            .collect::<Result<_>>()?;
        let refs: Vec<&Value> = args.iter().collect();
        let len = broadcast_len(&refs);
        let scalar = args.iter().all(|a| matches!(a, Value::Scalar(_)));
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let row: Vec<&ScalarValue> = args
                .iter()
                .map(|a| value_at(a, i))
                .collect::<Result<_>>()?;
            out.push(call_one(func, &row)?);
        }
        if scalar {
            Ok(Value::Scalar(out.remove(0)))
        } else {
            Ok(Value::Col(out))
        }
    }

    /// Shared ordering machinery of `Order` and `Limit`: the input column
    /// restricted to the previous candidate, sorted stably within previous
    /// tie groups, returning ordered base ids and fresh tie groups.
    fn ordered(
        &self,
        input: StmtId,
        prev_ids: Option<StmtId>,
        prev_groups: Option<StmtId>,
        desc: bool,
        nulls_last: bool,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let col = self.scalars(input)?;
        let domain: Vec<usize> = match prev_ids {
            Some(ids) => self.ids(ids)?.to_vec(),
            None => (0..col.len()).collect(),
        };
        let groups: Vec<usize> = match prev_groups {
            Some(groups) => self.ids(groups)?.to_vec(),
            None => vec![0; domain.len()],
        };

        let mut order: Vec<usize> = (0..domain.len()).collect();
        order.sort_by(|&a, &b| {
            groups[a]
                .cmp(&groups[b])
                .then_with(|| sort_cmp(&col[domain[a]], &col[domain[b]], desc, nulls_last))
        });

        let ids: Vec<usize> = order.iter().map(|&i| domain[i]).collect();
        let mut out_groups = Vec::with_capacity(order.len());
        let mut gid = 0usize;
        for (rank, &i) in order.iter().enumerate() {
            if rank > 0 {
                let j = order[rank - 1];
                let same = groups[i] == groups[j]
                    && sort_cmp(&col[domain[i]], &col[domain[j]], desc, nulls_last)
                        == Ordering::Equal;
                if !same {
                    gid += 1;
                }
            }
            out_groups.push(gid);
        }
        Ok((ids, out_groups))
    }
}

fn broadcast_len(values: &[&Value]) -> usize {
    values
        .iter()
        .filter(|v| !matches!(v, Value::Scalar(_)))
        .map(|v| v.len())
        .max()
        .unwrap_or(1)
}

fn value_at<'a>(value: &'a Value, i: usize) -> Result<&'a ScalarValue> {
    match value {
        Value::Scalar(v) => Ok(v),
        Value::Col(v) => v
            .get(i)
            .ok_or_else(|| DbError::new("column shorter than broadcast length")),
        other => Err(DbError::new(format!("row access into {other:?}"))),
    }
}

fn aggregate_one(func: AggrFunc, rows: &[ScalarValue], skip_nils: bool) -> Result<ScalarValue> {
    let filtered: Vec<&ScalarValue> = if skip_nils {
        rows.iter().filter(|v| !v.is_null()).collect()
    } else {
        rows.iter().collect()
    };
    match func {
        AggrFunc::Count => Ok(ScalarValue::Int64(filtered.len() as i64)),
        AggrFunc::Sum => {
            let vals: Vec<&ScalarValue> =
                filtered.into_iter().filter(|v| !v.is_null()).collect();
            if vals.is_empty() {
                return Ok(ScalarValue::Null);
            }
            if vals.iter().any(|v| matches!(v, ScalarValue::Float64(_))) {
                let mut sum = 0.0;
                for v in vals {
                    sum += as_f64(v)
                        .ok_or_else(|| DbError::new("sum over non-numeric value"))?;
                }
                Ok(ScalarValue::Float64(sum))
            } else {
                let mut sum = 0i64;
                for v in vals {
                    sum += v
                        .try_as_i64()
                        .ok_or_else(|| DbError::new("sum over non-numeric value"))?;
                }
                Ok(ScalarValue::Int64(sum))
            }
        }
        AggrFunc::Min | AggrFunc::Max => {
            let mut best: Option<&ScalarValue> = None;
            for v in filtered.into_iter().filter(|v| !v.is_null()) {
                best = Some(match best {
                    None => v,
                    Some(b) => match compare(v, b) {
                        Some(Ordering::Less) if func == AggrFunc::Min => v,
                        Some(Ordering::Greater) if func == AggrFunc::Max => v,
                        _ => b,
                    },
                });
            }
            Ok(best.cloned().unwrap_or(ScalarValue::Null))
        }
        AggrFunc::Avg => {
            let vals: Vec<f64> = filtered
                .into_iter()
                .filter(|v| !v.is_null())
                .filter_map(as_f64)
                .collect();
            if vals.is_empty() {
                Ok(ScalarValue::Null)
            } else {
                Ok(ScalarValue::Float64(
                    vals.iter().sum::<f64>() / vals.len() as f64,
                ))
            }
        }
        AggrFunc::NotUnique => {
            let mut seen = hashbrown::HashSet::new();
            for v in &filtered {
                if !seen.insert((*v).clone()) {
                    return Ok(ScalarValue::Boolean(true));
                }
            }
            Ok(ScalarValue::Boolean(false))
        }
        AggrFunc::ZeroOrOne => match filtered.len() {
            0 => Ok(ScalarValue::Null),
            1 => Ok((*filtered[0]).clone()),
            _ => Err(DbError::with_kind(
                DbErrorKind::Cardinality,
                "cardinality violation, scalar expression expected",
            )),
        },
    }
}

fn as_f64(v: &ScalarValue) -> Option<f64> {
    match v {
        ScalarValue::Float64(f) => Some(*f),
        _ => v.try_as_i64().map(|i| i as f64),
    }
}

fn call_one(func: ScalarFunc, args: &[&ScalarValue]) -> Result<ScalarValue> {
    let arity_err = || DbError::new(format!("wrong arity for {func:?}"));
    match func {
        ScalarFunc::Add | ScalarFunc::Sub | ScalarFunc::Mul | ScalarFunc::Div => {
            let &[a, b] = args else { return Err(arity_err()) };
            if a.is_null() || b.is_null() {
                return Ok(ScalarValue::Null);
            }
            if matches!(a, ScalarValue::Float64(_)) || matches!(b, ScalarValue::Float64(_)) {
                let (x, y) = (
                    as_f64(a).ok_or_else(|| DbError::new("arithmetic over non-number"))?,
                    as_f64(b).ok_or_else(|| DbError::new("arithmetic over non-number"))?,
                );
                let r = match func {
                    ScalarFunc::Add => x + y,
                    ScalarFunc::Sub => x - y,
                    ScalarFunc::Mul => x * y,
                    _ => {
                        if y == 0.0 {
                            return Ok(ScalarValue::Null);
                        }
                        x / y
                    }
                };
                Ok(ScalarValue::Float64(r))
            } else {
                let (x, y) = (
                    a.try_as_i64()
                        .ok_or_else(|| DbError::new("arithmetic over non-number"))?,
                    b.try_as_i64()
                        .ok_or_else(|| DbError::new("arithmetic over non-number"))?,
                );
                let r = match func {
                    ScalarFunc::Add => x.wrapping_add(y),
                    ScalarFunc::Sub => x.wrapping_sub(y),
                    ScalarFunc::Mul => x.wrapping_mul(y),
                    _ => {
                        if y == 0 {
                            return Ok(ScalarValue::Null);
                        }
                        x / y
                    }
                };
                Ok(ScalarValue::Int64(r))
            }
        }
        ScalarFunc::And | ScalarFunc::Or => {
            let &[a, b] = args else { return Err(arity_err()) };
            let (x, y) = (a.try_as_bool(), b.try_as_bool());
            let r = if func == ScalarFunc::And {
                match (x, y) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            } else {
                match (x, y) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            };
            Ok(r.map(ScalarValue::Boolean).unwrap_or(ScalarValue::Null))
        }
        ScalarFunc::Not => {
            let &[a] = args else { return Err(arity_err()) };
            Ok(a.try_as_bool()
                .map(|b| ScalarValue::Boolean(!b))
                .unwrap_or(ScalarValue::Null))
        }
        ScalarFunc::IsNull => {
            let &[a] = args else { return Err(arity_err()) };
            Ok(ScalarValue::Boolean(a.is_null()))
        }
        ScalarFunc::IfThenElse => {
            let &[cond, a, b] = args else { return Err(arity_err()) };
            if cond.try_as_bool() == Some(true) {
                Ok(a.clone())
            } else {
                Ok(b.clone())
            }
        }
        ScalarFunc::Min | ScalarFunc::Max => {
            let &[a, b] = args else { return Err(arity_err()) };
            if a.is_null() || b.is_null() {
                return Ok(ScalarValue::Null);
            }
            let ord = compare(a, b)
                .ok_or_else(|| DbError::new("min/max over incomparable values"))?;
            let pick_a = match func {
                ScalarFunc::Min => ord != Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(if pick_a { a.clone() } else { b.clone() })
        }
        ScalarFunc::Hash => {
            let &[a] = args else { return Err(arity_err()) };
            Ok(ScalarValue::Int64(hash_value(a) as i64))
        }
        ScalarFunc::RotateXorHash { bits } => {
            let &[acc, v] = args else { return Err(arity_err()) };
            let acc = acc
                .try_as_i64()
                .ok_or_else(|| DbError::new("hash accumulator must be integer"))? as u64;
            Ok(ScalarValue::Int64(rotate_xor_hash(acc, bits, v) as i64))
        }
    }
}

fn cast_value(v: &ScalarValue, to: DataType) -> ScalarValue {
    if v.is_null() {
        return ScalarValue::Null;
    }
    match to {
        DataType::Boolean => v
            .try_as_bool()
            .map(ScalarValue::Boolean)
            .unwrap_or(ScalarValue::Null),
        DataType::Int32 => v
            .try_as_i64()
            .map(|i| ScalarValue::Int32(i as i32))
            .unwrap_or(ScalarValue::Null),
        DataType::Int64 => match v {
            ScalarValue::Float64(f) => ScalarValue::Int64(*f as i64),
            ScalarValue::Boolean(b) => ScalarValue::Int64(*b as i64),
            ScalarValue::Utf8(s) => s
                .parse()
                .map(ScalarValue::Int64)
                .unwrap_or(ScalarValue::Null),
            _ => v
                .try_as_i64()
                .map(ScalarValue::Int64)
                .unwrap_or(ScalarValue::Null),
        },
        DataType::Float64 => as_f64(v)
            .map(ScalarValue::Float64)
            .unwrap_or(ScalarValue::Null),
        DataType::Utf8 => ScalarValue::Utf8(v.to_string()),
    }
}
