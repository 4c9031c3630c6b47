//! Rendering of compiled statement graphs, for diagnostics and for
//! structural comparison of plans.

use std::fmt::Write as _;

use serde::Serialize;

use crate::statements::CompiledPlan;

/// One statement of a compiled plan in rendered form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainEntry {
    pub id: String,
    pub op: &'static str,
    pub operands: Vec<String>,
    pub datatype: String,
    pub alias: Option<(String, String)>,
    pub side_effect: bool,
}

pub fn explain_entries(plan: &CompiledPlan) -> Vec<ExplainEntry> {
    plan.graph
        .iter()
        .map(|(id, stmt)| ExplainEntry {
            id: id.to_string(),
            op: stmt.op.name(),
            operands: stmt.op.operands().iter().map(|o| o.to_string()).collect(),
            datatype: stmt.datatype.to_string(),
            alias: stmt.alias.clone(),
            side_effect: stmt.side_effect,
        })
        .collect()
}

/// One line per statement in emission order. Identical plans render
/// identically, so the output doubles as a structural fingerprint.
pub fn format_plan(plan: &CompiledPlan) -> String {
    let mut out = String::new();
    for entry in explain_entries(plan) {
        let _ = write!(out, "{}: {}(", entry.id, entry.op);
        for (idx, operand) in entry.operands.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            out.push_str(operand);
        }
        let _ = write!(out, ") -> {}", entry.datatype);
        if let Some((table, name)) = &entry.alias {
            let _ = write!(out, " [{table}.{name}]");
        }
        if entry.side_effect {
            out.push_str(" !");
        }
        out.push('\n');
    }
    for col in &plan.outputs {
        let _ = writeln!(out, "output {} = {}.{}", col.id, col.table, col.name);
    }
    out
}
