//! Shared eligibility rules for code values.
//!
//! Both the startup import and the claim allocation use the same predicate,
//! so a value rejected at import time can never be handed out later either.
//! The exclusions guard against command-like text (`!codestats`, `addcode`
//! lines) that once leaked into a codes file being served as real codes.

/// Values starting with this character look like chat commands.
pub const EXCLUDED_PREFIX: char = '!';

/// Values containing this substring are captured import commands, not codes.
pub const EXCLUDED_SUBSTRING: &str = "addcode";

/// Anything shorter than this cannot be a real code.
pub const MIN_CODE_LEN: usize = 3;

/// Whether a stored code value may be handed out to a claimer.
pub fn is_claimable(value: &str) -> bool {
    !value.starts_with(EXCLUDED_PREFIX)
        && !value.contains(EXCLUDED_SUBSTRING)
        && value.len() >= MIN_CODE_LEN
}

/// Whether a raw import line (already trimmed) should be inserted.
///
/// Import is stricter than [`is_claimable`]: a `!` anywhere in the line
/// marks it as captured command text, not just at the start.
pub fn is_importable(value: &str) -> bool {
    !value.is_empty() && !value.contains(EXCLUDED_PREFIX) && is_claimable(value)
}

/// SQL rendition of [`is_claimable`], for use in `WHERE` clauses.
///
/// Built from the same constants as the Rust predicate so the two cannot
/// drift apart.
pub(crate) fn eligible_sql() -> String {
    format!(
        "code NOT LIKE '{EXCLUDED_PREFIX}%' AND instr(code, '{EXCLUDED_SUBSTRING}') = 0 AND length(code) >= {MIN_CODE_LEN}"
    )
}
