//! Scoped variable context for plan invocations.
//!
//! Each invocation owns a `Context` whose parent is the caller's context.
//! Lookups walk the chain child-first, so a child entry shadows any ancestor
//! entry of the same name. Children only ever read through the parent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Text(String),
    List(Vec<String>),
}

impl ContextValue {
    /// Display form; lists are joined with `", "`.
    pub fn display(&self) -> String {
        match self {
            ContextValue::Text(s) => s.clone(),
            ContextValue::List(items) => items.join(", "),
        }
    }

    /// Convert a submitted answer into a context value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => ContextValue::Text(s.clone()),
            Value::Null => ContextValue::Text(String::new()),
            Value::Array(items) => ContextValue::List(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            other => ContextValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Text(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Text(s)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(items: Vec<String>) -> Self {
        ContextValue::List(items)
    }
}

#[derive(Debug, Default)]
pub struct Context<'p> {
    entries: HashMap<String, ContextValue>,
    parent: Option<&'p Context<'p>>,
}

impl<'p> Context<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty scope reading through to `parent`.
    pub fn child(parent: Option<&'p Context<'p>>) -> Self {
        Self {
            entries: HashMap::new(),
            parent,
        }
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ContextValue>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            parent: None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Entries of this scope only.
    pub fn local(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn lookup(&self, key: &str) -> Option<&ContextValue> {
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if let Some(value) = ctx.entries.get(key) {
                return Some(value);
            }
            scope = ctx.parent;
        }
        None
    }

    /// Display form of `key`, or `""` when unset anywhere in the chain.
    pub fn resolve(&self, key: &str) -> String {
        self.lookup(key).map(ContextValue::display).unwrap_or_default()
    }
}
