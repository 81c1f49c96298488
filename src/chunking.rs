//! Splitting long text into platform-deliverable messages.
//!
//! Lengths are counted in characters, not bytes, so a split never lands
//! inside a multi-byte character.

/// How far back from the end of a window to look for a natural break.
const BREAK_SEARCH_CHARS: usize = 100;

/// Split `text` into trimmed, non-empty chunks of at most `max_length`
/// characters.
///
/// Each window prefers to end just after a sentence terminator or newline
/// found in its last 100 characters, then after a space, and only falls back
/// to a hard cut when neither exists.
pub fn split_message(text: &str, max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(max_length) else {
            push_trimmed(&mut chunks, rest);
            break;
        };

        let window = &rest[..window_end];
        let split_at = find_break(window).unwrap_or(window_end);

        push_trimmed(&mut chunks, &rest[..split_at]);
        rest = rest[split_at..].trim_start();
    }

    chunks
}

/// Byte offset just past the preferred break character in the tail of
/// `window`, if any.
fn find_break(window: &str) -> Option<usize> {
    let tail: Vec<(usize, char)> = window
        .char_indices()
        .rev()
        .take(BREAK_SEARCH_CHARS)
        .collect();

    tail.iter()
        .find(|(_, c)| matches!(c, '\n' | '.' | '!' | '?'))
        .or_else(|| tail.iter().find(|(_, c)| *c == ' '))
        .map(|(index, c)| index + c.len_utf8())
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Group whole lines into chunks of at most `max_length` characters.
///
/// Lines keep their own terminators. A single line longer than the limit
/// becomes its own chunk rather than being cut.
pub fn split_log_lines<S: AsRef<str>>(lines: &[S], max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_length = 0;

    for line in lines {
        let line = line.as_ref();
        let line_length = line.chars().count();
        if current_length + line_length > max_length && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_length = 0;
        }
        current.push_str(line);
        current_length += line_length;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
