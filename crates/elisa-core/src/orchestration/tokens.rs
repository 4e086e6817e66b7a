//! Per-session token accounting.

use std::collections::BTreeMap;

use crate::events::{AgentTokens, SessionEvent};

#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
    per_agent: BTreeMap<String, AgentTokens>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_for_agent(&mut self, agent_name: &str, input: u64, output: u64, cost_usd: f64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.cost_usd += cost_usd;

        let entry = self.per_agent.entry(agent_name.to_string()).or_default();
        entry.input += input;
        entry.output += output;
        entry.cost_usd += cost_usd;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    pub fn snapshot(&self) -> SessionEvent {
        SessionEvent::TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total: self.total(),
            cost_usd: self.cost_usd,
            per_agent: self.per_agent.clone(),
        }
    }
}
