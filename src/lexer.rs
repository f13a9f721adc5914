//! Splitting raw template text into literal runs and code fragments.

use regex::Regex;
use std::sync::LazyLock;

/// `{{ ... }}` with the body captured lazily, so `{{a}}{{b}}` yields two fragments
/// and a fragment may span several lines.
static DELIMITER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{(.*?)\}\}").expect("delimiter pattern is valid")
});

/// Represents a token resulting from splitting a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text copied to the output as-is. Never empty.
    Text(String),
    /// The body of a `{{ ... }}` pair, verbatim and untrimmed. May be empty.
    Code(String),
}

impl Token {
    pub fn is_code(&self) -> bool {
        matches!(self, Token::Code(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Token::Text(s) | Token::Code(s) => s,
        }
    }
}

/// Split `text` into an ordered token sequence.
///
/// Literal runs between fragments are kept only when non-empty; fragment bodies are
/// always kept, whitespace-only ones included, so bare `end`/`else` stay matchable.
/// An unterminated `{{` is ordinary literal text.
pub fn split_into_tokens(text: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut last = 0;

    for caps in DELIMITER.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            out.push(Token::Text(text[last..whole.start()].to_string()));
        }
        out.push(Token::Code(body.as_str().to_string()));
        last = whole.end();
    }

    if last < text.len() {
        out.push(Token::Text(text[last..].to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    fn code(s: &str) -> Token {
        Token::Code(s.to_string())
    }

    #[test]
    fn test_plain_text_is_single_token() {
        assert_eq!(split_into_tokens("just text"), vec![text("just text")]);
        assert!(split_into_tokens("").is_empty());
    }

    #[test]
    fn test_fragments_and_literals_alternate() {
        let tokens = split_into_tokens("A{{ x }}B{{y}}");
        assert_eq!(tokens, vec![text("A"), code(" x "), text("B"), code("y")]);
    }

    #[test]
    fn test_empty_literals_are_dropped_but_empty_fragments_kept() {
        let tokens = split_into_tokens("{{}}{{ end }}");
        assert_eq!(tokens, vec![code(""), code(" end ")]);
    }

    #[test]
    fn test_fragment_may_span_lines() {
        let tokens = split_into_tokens("{{ if\n x }}\n");
        assert_eq!(tokens, vec![code(" if\n x "), text("\n")]);
        assert!(tokens[0].is_code());
        assert_eq!(tokens[1].text(), "\n");
    }

    #[test]
    fn test_closing_delimiter_is_non_greedy() {
        let tokens = split_into_tokens("{{ a }} and {{ b }}");
        assert_eq!(tokens, vec![code(" a "), text(" and "), code(" b ")]);
    }

    #[test]
    fn test_unterminated_open_delimiter_is_literal() {
        assert_eq!(split_into_tokens("a {{ b"), vec![text("a {{ b")]);
    }
}
