//! Context assembly — a bounded text window over a request's documents.
//!
//! Documents are taken greedily in the order given. Each contributes a
//! `Document: <filename>` header, as much content as still fits, and a
//! `---` separator. Header and separator are reserved up front, so the
//! assembled text never exceeds the budget. Sizes are in `char`s.

use serde::{Deserialize, Serialize};

const SEPARATOR: &str = "\n---\n";

/// Read-only snapshot of one document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub filename: String,
    pub content: String,
}

impl DocumentContext {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self { filename: filename.into(), content: content.into() }
    }
}

/// The assembled context handed to generation and verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Filenames that contributed at least a header, in order.
    pub sources: Vec<String>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Leading `max_chars` characters of the context.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        prefix_chars(&self.text, max_chars)
    }
}

/// Build a context of at most `max_chars` characters from `documents`.
pub fn assemble(documents: &[DocumentContext], max_chars: usize) -> AssembledContext {
    let sep_len = SEPARATOR.chars().count();
    let mut out = AssembledContext::default();
    let mut used = 0usize;

    for doc in documents {
        let header = format!("Document: {}\n", doc.filename);
        let overhead = header.chars().count() + sep_len;
        let remaining = max_chars.saturating_sub(used);
        if remaining <= overhead {
            break;
        }

        let excerpt = prefix_chars(&doc.content, remaining - overhead);
        out.text.push_str(&header);
        out.text.push_str(excerpt);
        out.text.push_str(SEPARATOR);
        out.sources.push(doc.filename.clone());
        used += overhead + excerpt.chars().count();

        if used >= max_chars {
            break;
        }
    }

    out
}

/// Longest prefix of `s` holding at most `n` chars, cut on a char boundary.
pub(crate) fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
