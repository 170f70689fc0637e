//! Redis-style glob matching for adapters without a native SCAN MATCH

use regex::Regex;

/// Compiled glob pattern with Redis `MATCH` semantics
///
/// Supports `*`, `?`, character classes (`[abc]`, `[a-z]`, `[^a]`) and
/// backslash escapes. Matching is anchored at both ends.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let regex = Regex::new(&glob_to_regex(pattern)).ok();
        Self {
            source: pattern.to_string(),
            regex,
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(candidate),
            // Malformed class and the like: fall back to literal comparison
            None => self.source == candidate,
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' => break,
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(class_char);
                        }
                        other => out.push(other),
                    }
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}
