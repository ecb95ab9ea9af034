//! Line classification and correlation keys.

/// Reserved payload delivered to a client whose command got no matching
/// reply within the retry budget.  A device must never send this text.
pub const TIMEOUT_SENTINEL: &str = "!timeout";

/// Terminator appended to every line written to the device or a client.
pub const LINE_TERMINATOR: &str = "\n";

/// Prefix marking a device-side comment.
pub const COMMENT_PREFIX: char = '#';

/// `true` when `line` is a comment (starts with `#`).
///
/// Leading whitespace is not skipped: `" #x"` is not a comment, matching how
/// the device firmware emits comments in column zero.
pub fn is_comment(line: &str) -> bool {
    line.starts_with(COMMENT_PREFIX)
}

/// `true` for lines that carry meaning: not blank and not a comment.
pub fn is_significant(line: &str) -> bool {
    !line.trim().is_empty() && !is_comment(line)
}

/// First whitespace-delimited word of `line`, the correlation key.
///
/// Returns `None` for blank lines.
pub fn command_token(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// `true` when `reply` answers a command whose token is `token`.
pub fn answers(reply: &str, token: &str) -> bool {
    command_token(reply) == Some(token)
}
