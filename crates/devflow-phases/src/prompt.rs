use std::fmt::Write as _;

use devflow_phase_api::PhaseContext;

/// Appended to every prompt so responses parse deterministically.
pub(crate) const RESPONSE_FORMAT: &str = r#"

# Response Format

Respond with a single JSON object and nothing else:

{"content": "<your deliverable>", "confidence": <0.0-1.0>, "summary": "<one sentence>"}

Put the complete deliverable in "content". Do not describe what you would
write; write it."#;

/// Extra response field the validation phase must fill in.
pub(crate) const VALIDATION_FORMAT: &str = r#"

Also include "issues": {"blocking": [...], "advisory": [...]}. List as
blocking only defects that make the implementation incorrect or unsafe."#;

/// Task title, description, priority, and requirements as a prompt section.
pub(crate) fn task_brief(ctx: &PhaseContext) -> String {
    let mut brief = format!(
        "# Task\n\nTask ID: {}\nTitle: {}\nPriority: {}\n",
        ctx.task_id, ctx.title, ctx.priority
    );
    if !ctx.description.trim().is_empty() {
        let _ = write!(brief, "\n{}\n", ctx.description.trim());
    }

    brief.push_str("\n## Requirements\n\n");
    if ctx.requirements.is_explicit_none() {
        brief.push_str("No explicit requirements; infer reasonable scope from the title.\n");
    } else {
        for (category, lines) in ctx.requirements.iter() {
            let _ = writeln!(brief, "### {category}");
            for line in lines {
                let _ = writeln!(brief, "- {line}");
            }
        }
    }
    brief
}
