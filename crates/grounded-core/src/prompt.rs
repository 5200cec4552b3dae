//! System prompts and user message construction.
//!
//! The grounded prompt confines the model to the retrieved context; the
//! ungrounded prompt lets it fall back to general knowledge but requires it
//! to say so.

/// Used when confidence meets the threshold.
pub const GROUNDED_SYSTEM_PROMPT: &str = "\
You are a helpful AI assistant that answers questions based strictly on provided context.

IMPORTANT RULES:
1. Answer ONLY based on the provided context below
2. If the context doesn't contain information to answer the question, say \"I don't have enough information\"
3. Be concise and factual
4. Do NOT make up or infer information not in the context
5. If the answer spans multiple chunks, synthesize them naturally

Provided Context:
";

/// Used when confidence is below the threshold or nothing was retrieved.
pub const UNGROUNDED_SYSTEM_PROMPT: &str = "\
You are a helpful AI assistant. The following context is available but may be limited.

IMPORTANT RULES:
1. If the context below helps answer the question, use it as primary source
2. If context is insufficient, provide the best answer you can based on your knowledge
3. Be honest about context limitations
4. Clearly indicate if you're going beyond the provided context
5. Be concise and factual

Available Context (limited):
";

/// Marker appended to the question when retrieval produced no context.
pub const NO_CONTEXT_NOTICE: &str = "(No relevant context found in documents)";

pub fn system_prompt(grounded: bool) -> &'static str {
    if grounded {
        GROUNDED_SYSTEM_PROMPT
    } else {
        UNGROUNDED_SYSTEM_PROMPT
    }
}

/// Build the user turn from the question and the assembled context.
pub fn user_message(question: &str, context: &str) -> String {
    if context.is_empty() {
        format!("Question: {}\n\n{}", question, NO_CONTEXT_NOTICE)
    } else {
        format!("{}\n\nQuestion: {}\n\nAnswer: ", context, question)
    }
}
