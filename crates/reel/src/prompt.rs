//! The system prompt sent at the head of every conversation.
use minijinja::{context, Environment};
use once_cell::sync::Lazy;
use serde::Serialize;

use mcp_core::tool::Tool;

const SYSTEM_TEMPLATE: &str = "system.md";

static ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    // The template is compiled in; a syntax error surfaces as a render error
    let _ = env.add_template(SYSTEM_TEMPLATE, include_str!("prompts/system.md"));
    env
});

#[derive(Serialize)]
struct ToolEntry<'a> {
    name: &'a str,
    description: Option<&'a str>,
}

/// Render the system prompt listing every available tool.
pub fn build_system_prompt(
    tools: &[Tool],
    project_id: Option<&str>,
) -> Result<String, minijinja::Error> {
    let tools: Vec<ToolEntry<'_>> = tools
        .iter()
        .map(|tool| ToolEntry {
            name: &tool.name,
            description: tool.description.as_deref().filter(|d| !d.is_empty()),
        })
        .collect();

    ENV.get_template(SYSTEM_TEMPLATE)?
        .render(context! { tools => tools, project_id => project_id })
}
