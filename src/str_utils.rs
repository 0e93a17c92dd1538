use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Returns the first `n` characters as a Cow<str>, avoiding allocation if possible.
pub fn first_n_chars_lossy(s: &str, n: usize) -> Cow<'_, str> {
    if s.chars().count() <= n {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(prefix_chars(s, n).to_string())
    }
}

/// Returns the prefix of the string containing at most `n` whitespace-separated
/// words, preserving the original spacing between them.
pub fn first_n_words(s: &str, n: usize) -> &str {
    let mut words_seen = 0;
    let mut in_word = false;
    for (idx, ch) in s.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            words_seen += 1;
            if words_seen > n {
                return s[..idx].trim_end();
            }
        }
    }
    s
}
