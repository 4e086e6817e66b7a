//! Translate a visual block workspace into a `Plan`.
//!
//! The block editor saves composite skills as a JSON tree:
//!
//! ```text
//! { "blocks": { "blocks": [ start, ... ] } }
//!
//! skill_flow_start ──next──▶ skill_ask_user ──next──▶ skill_branch_if ──next──▶ ...
//!                                                          │
//!                                                   inputs.THEN_BLOCKS
//!                                                          ▼
//!                                                     skill_output ──next──▶ ...
//! ```
//!
//! This module is a pure function of that JSON. Blocks it does not know are
//! skipped; blocks without an id get `step-N` in walk order.

use serde_json::Value;

use super::schema::{Plan, Step};

/// Build a plan from workspace JSON. A workspace without a
/// `skill_flow_start` block yields a plan with no steps.
pub fn interpret_workspace(plan_id: &str, plan_name: &str, workspace: &Value) -> Plan {
    let start = workspace
        .pointer("/blocks/blocks")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("skill_flow_start"))
        });

    let Some(start) = start else {
        return Plan::new(plan_id, plan_name, Vec::new());
    };

    let mut ids = IdCounter::default();
    let steps = next_chain(start)
        .into_iter()
        .skip(1)
        .filter_map(|block| interpret_block(block, &mut ids))
        .collect();

    Plan::new(plan_id, plan_name, steps)
}

#[derive(Default)]
struct IdCounter(usize);

impl IdCounter {
    fn id_for(&mut self, block: &Value) -> String {
        match block.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                self.0 += 1;
                format!("step-{}", self.0)
            }
        }
    }
}

/// `block` followed by every block reachable through `next.block`.
fn next_chain(block: &Value) -> Vec<&Value> {
    let mut chain = vec![block];
    let mut current = block;
    while let Some(next) = current.pointer("/next/block") {
        chain.push(next);
        current = next;
    }
    chain
}

fn field(block: &Value, name: &str) -> String {
    block
        .get("fields")
        .and_then(|f| f.get(name))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn interpret_block(block: &Value, ids: &mut IdCounter) -> Option<Step> {
    let kind = block.get("type").and_then(Value::as_str)?;
    let step = match kind {
        "skill_ask_user" => Step::AskUser {
            id: ids.id_for(block),
            question: field(block, "QUESTION"),
            header: field(block, "HEADER"),
            options: field(block, "OPTIONS")
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            store_as: field(block, "STORE_AS"),
        },
        "skill_branch_if" => {
            let then_steps = block
                .pointer("/inputs/THEN_BLOCKS/block")
                .map(|inner| {
                    next_chain(inner)
                        .into_iter()
                        .filter_map(|b| interpret_block(b, ids))
                        .collect()
                })
                .unwrap_or_default();
            Step::Branch {
                id: ids.id_for(block),
                context_key: field(block, "CONTEXT_KEY"),
                match_value: field(block, "MATCH_VALUE"),
                then_steps,
            }
        }
        "skill_invoke" => Step::InvokeSubplan {
            id: ids.id_for(block),
            plan_id: field(block, "SKILL_ID"),
            store_as: field(block, "STORE_AS"),
        },
        "skill_run_agent" => Step::RunAgent {
            id: ids.id_for(block),
            prompt: field(block, "PROMPT"),
            store_as: field(block, "STORE_AS"),
        },
        "skill_set_context" => Step::SetVariable {
            id: ids.id_for(block),
            key: field(block, "KEY"),
            value: field(block, "VALUE"),
        },
        "skill_output" => Step::Output {
            id: ids.id_for(block),
            template: field(block, "TEMPLATE"),
        },
        other => {
            tracing::debug!("[Workspace] Skipping unknown block type '{}'", other);
            return None;
        }
    };
    Some(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_start_block_gives_empty_plan() {
        let ws = json!({"blocks": {"blocks": [{"type": "skill_output", "fields": {"TEMPLATE": "x"}}]}});
        let plan = interpret_workspace("s", "S", &ws);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.id, "s");
    }

    #[test]
    fn test_chain_with_branch() {
        let ws = json!({
            "blocks": {"blocks": [{
                "type": "skill_flow_start",
                "next": {"block": {
                    "type": "skill_ask_user",
                    "id": "ask",
                    "fields": {"QUESTION": "Pick a color", "HEADER": "color",
                               "OPTIONS": " Red, Blue ,,", "STORE_AS": "c"},
                    "next": {"block": {
                        "type": "skill_branch_if",
                        "fields": {"CONTEXT_KEY": "c", "MATCH_VALUE": "Red"},
                        "inputs": {"THEN_BLOCKS": {"block": {
                            "type": "skill_output",
                            "fields": {"TEMPLATE": "red!"}
                        }}},
                        "next": {"block": {
                            "type": "mystery_block",
                            "next": {"block": {
                                "type": "skill_set_context",
                                "fields": {"KEY": "k", "VALUE": "{{c}}"}
                            }}
                        }}
                    }}
                }}
            }]}
        });

        let plan = interpret_workspace("skill-1", "Colors", &ws);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(
            plan.steps[0],
            Step::AskUser {
                id: "ask".into(),
                question: "Pick a color".into(),
                header: "color".into(),
                options: vec!["Red".into(), "Blue".into()],
                store_as: "c".into(),
            }
        );
        match &plan.steps[1] {
            Step::Branch { id, then_steps, .. } => {
                // The nested output is numbered before its enclosing branch.
                assert_eq!(id, "step-2");
                assert_eq!(
                    then_steps,
                    &vec![Step::Output { id: "step-1".into(), template: "red!".into() }]
                );
            }
            other => panic!("expected branch, got {:?}", other),
        }
        assert_eq!(
            plan.steps[2],
            Step::SetVariable { id: "step-3".into(), key: "k".into(), value: "{{c}}".into() }
        );
    }
}
