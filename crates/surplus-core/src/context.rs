//! Run-context composition.
//!
//! A run context is the short text carried from one execution of a task to
//! the next. Truncation keeps the tail of the text, since the end of a
//! transcript holds its conclusion.

/// Default bound on a stored run context, in characters.
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 4000;

pub const SUCCESS_TAG: &str = "[previous run: succeeded]";
pub const FAILURE_TAG: &str = "[previous run: FAILED]";

const ELISION: &str = "[...]\n";

/// Keeps the last `max_chars` characters of `text`. When anything is cut the
/// result starts with an elision marker and still fits in `max_chars`.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }
    let marker = ELISION.chars().count();
    if max_chars <= marker {
        return text.chars().skip(len - max_chars).collect();
    }
    let keep = max_chars - marker;
    let tail: String = text.chars().skip(len - keep).collect();
    format!("{ELISION}{tail}")
}

fn tagged(tag: &str, body: &str, max_chars: usize) -> String {
    let header = format!("{tag}\n");
    let room = max_chars.saturating_sub(header.chars().count());
    format!("{header}{}", truncate_tail(body.trim(), room))
}

/// Context written after a successful run.
pub fn success_context(result_text: &str, max_chars: usize) -> String {
    tagged(SUCCESS_TAG, result_text, max_chars)
}

/// Context written after a failed run, tagged so the next prompt does not
/// read it as a success.
pub fn failure_context(error: &str, max_chars: usize) -> String {
    tagged(FAILURE_TAG, error, max_chars)
}

/// Prompt sent to the executor: prior context first, when there is any.
pub fn compose_prompt(context: &str, prompt: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        prompt.to_string()
    } else {
        format!("{context}\n\n---\n\n{prompt}")
    }
}
