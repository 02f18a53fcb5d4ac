//! Prompt templates for the pipeline stages and the question helpers.
//!
//! Templates live in `config/prompts/` and are compiled into the binary.
//! Placeholders use `{{key}}` syntax and are substituted in one pass, so text
//! inserted for one key is never re-scanned for another.

pub const ANSWER_SYSTEM: &str = include_str!("../../config/prompts/answer_system.txt");
pub const ANSWER_QUERY: &str = include_str!("../../config/prompts/answer_query.txt");
pub const VERIFY_SYSTEM: &str = include_str!("../../config/prompts/verify_system.txt");
pub const VERIFY_QUERY: &str = include_str!("../../config/prompts/verify_query.txt");
pub const EXTRACT_SYSTEM: &str = include_str!("../../config/prompts/extract_system.txt");
pub const EXTRACT_QUERY: &str = include_str!("../../config/prompts/extract_query.txt");
pub const SWAP_SYSTEM: &str = include_str!("../../config/prompts/swap_system.txt");
pub const SWAP_NEW: &str = include_str!("../../config/prompts/swap_new.txt");
pub const SWAP_REPLACE: &str = include_str!("../../config/prompts/swap_replace.txt");

/// Replace each `{{key}}` in `template` with its value from `vars`.
/// Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn answer_prompt(query: &str, context: &str) -> String {
    render(ANSWER_QUERY, &[("query", query), ("context", context)])
}

pub fn verify_prompt(query: &str, answer: &str, documents: &str) -> String {
    render(VERIFY_QUERY, &[("query", query), ("answer", answer), ("documents", documents)])
}

pub fn extract_prompt(input: &str) -> String {
    render(EXTRACT_QUERY, &[("input", input)])
}

/// Prompt for a replacement question. A blank `original` asks for a new one.
pub fn swap_prompt(original: &str, user_context: &str, existing: &[String]) -> String {
    let existing = if existing.is_empty() {
        "None".to_string()
    } else {
        existing.iter().map(|q| format!("- {q}")).collect::<Vec<_>>().join("\n")
    };
    if original.trim().is_empty() {
        render(SWAP_NEW, &[("context", user_context), ("existing", &existing)])
    } else {
        render(
            SWAP_REPLACE,
            &[("context", user_context), ("original", original), ("existing", &existing)],
        )
    }
}
