//! `{{name}}` placeholder rendering.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use super::context::Context;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex"))
}

/// Replace every `{{name}}` with its resolved value. Unknown names render
/// as the empty string; rendering never fails.
pub fn render(template: &str, context: &Context<'_>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| context.resolve(&caps[1]))
        .into_owned()
}
