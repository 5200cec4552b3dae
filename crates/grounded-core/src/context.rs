//! Query-time scoring and context assembly.
//!
//! - [`confidence`]: best similarity among the retrieved matches.
//! - [`assemble_context`]: concatenate matches under a token budget,
//!   truncating only the match that would overflow it.
//! - [`excerpt`]: short display snippet for source references.
//!
//! Token counts use the same `ceil(chars / 4)` estimate as the chunker, so
//! a budget of `n` tokens is a budget of `4n` characters.

use crate::chunk::{estimate_tokens, CHARS_PER_TOKEN};
use crate::index::VectorMatch;

/// Default excerpt length for source references, in characters.
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Maximum score among `matches`, or `0.0` when there are none.
pub fn confidence(matches: &[VectorMatch]) -> f32 {
    matches.iter().map(|m| m.score).fold(0.0, f32::max)
}

/// `true` iff `confidence >= threshold`.
pub fn is_grounded(confidence: f32, threshold: f32) -> bool {
    confidence >= threshold
}

/// Context text handed to the generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Matches that contributed text, including a truncated one.
    pub chunks_used: usize,
    /// Whether the last contributing match was cut to fit.
    pub truncated: bool,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

fn marker(m: &VectorMatch) -> String {
    format!(
        "[Document: {} | Chunk {} | Similarity: {:.2}]\n",
        m.payload.document_id, m.payload.chunk_index, m.score
    )
}

/// Build the context block from ranked matches.
///
/// Each match contributes `marker + content + "\n\n"`. Matches are added in
/// order while they fit in `max_tokens`; the first match that does not fit
/// is truncated to the remaining budget and assembly stops there. The
/// result's estimated token count never exceeds `max_tokens`.
pub fn assemble_context(matches: &[VectorMatch], max_tokens: usize) -> AssembledContext {
    let budget = max_tokens * CHARS_PER_TOKEN;
    let mut ctx = AssembledContext::default();
    let mut used = 0usize;

    for m in matches {
        let header = marker(m);
        let overhead = header.chars().count() + 2;
        let content_chars = m.payload.content.chars().count();

        if used + overhead + content_chars <= budget {
            ctx.text.push_str(&header);
            ctx.text.push_str(&m.payload.content);
            ctx.text.push_str("\n\n");
            ctx.chunks_used += 1;
            used += overhead + content_chars;
            continue;
        }

        let remaining = budget.saturating_sub(used + overhead);
        let cut = truncate_chars(&m.payload.content, remaining);
        if !cut.is_empty() {
            ctx.text.push_str(&header);
            ctx.text.push_str(&cut);
            ctx.text.push_str("\n\n");
            ctx.chunks_used += 1;
            ctx.truncated = true;
        }
        break;
    }

    ctx
}

/// Cut `text` to at most `max_tokens` estimated tokens.
///
/// Prefers to end at the last `.` in the allowed window; otherwise hard-cuts
/// and appends `...` within the same budget.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    truncate_chars(text, max_tokens * CHARS_PER_TOKEN)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let window: String = text.chars().take(max_chars).collect();
    if let Some(pos) = window.rfind('.') {
        if pos > 0 {
            return window[..=pos].to_string();
        }
    }

    if max_chars <= ELLIPSIS.len() {
        return window;
    }
    let mut cut: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// Display snippet of at most `max_chars` characters plus `...`, cut at the
/// last word boundary when one exists.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let window: String = text.chars().take(max_chars).collect();
    match window.rfind(' ') {
        Some(pos) if pos > 0 => format!("{}{}", &window[..pos], ELLIPSIS),
        _ => format!("{}{}", window, ELLIPSIS),
    }
}
