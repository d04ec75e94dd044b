//! Subcommand implementations. Each renders a table or pretty JSON on
//! stdout.

pub mod checkpoints;
pub mod operators;
pub mod states;
pub mod window;

/// Truncate `s` to at most `width` characters for table columns.
pub(crate) fn clip(s: &str, width: usize) -> &str {
    match s.char_indices().nth(width) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
