//! Lexical analysis of a command line.
//!
//! A line is split on whitespace into a command name, positional tokens and
//! `key=value` keyword tokens. Double quotes group whitespace into a single
//! token and may appear in the middle of a word; a backslash takes the next
//! character literally.

use std::collections::HashMap;

/// Result of tokenizing one input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    /// The first token, lowercased.
    pub command: String,
    /// Tokens without a keyword marker, in order.
    pub positional: Vec<String>,
    /// `key=value` tokens.
    pub keywords: HashMap<String, String>,
}

/// Errors that can occur while tokenizing a line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    /// The same keyword appeared more than once.
    #[error("key {0} specified twice")]
    DuplicateKeyword(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingQuoted,
}

/// A token before keyword detection: its text plus the byte offset of the first
/// `=` that was not escaped.
#[derive(Debug, Default)]
struct RawToken {
    text: String,
    marker: Option<usize>,
}

struct LexingFsm {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    current: RawToken,
}

impl LexingFsm {
    fn new(line: &str) -> Self {
        LexingFsm {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            current: RawToken::default(),
        }
    }

    /// Runs the machine to the end of the input. An unterminated quote is closed
    /// implicitly.
    fn make_tokens(&mut self) -> Vec<RawToken> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingQuoted => self.handle_quoted(ch),
            }
        }

        self.finish_token(&mut out);
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<RawToken>) {
        if ch.is_whitespace() {
            return;
        }
        self.state = LexingState::ReadingWord;
        self.handle_word(ch, out);
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<RawToken>) {
        match ch {
            c if c.is_whitespace() => {
                self.finish_token(out);
                self.state = LexingState::Start;
            }
            '"' => self.state = LexingState::ReadingQuoted,
            '\\' => self.handle_escape(),
            '=' => self.push_marker(),
            c => self.current.text.push(c),
        }
    }

    /// Quotes only protect whitespace; an `=` inside them is still a marker.
    fn handle_quoted(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' => self.handle_escape(),
            '=' => self.push_marker(),
            c => self.current.text.push(c),
        }
    }

    fn push_marker(&mut self) {
        if self.current.marker.is_none() {
            self.current.marker = Some(self.current.text.len());
        }
        self.current.text.push('=');
    }

    /// Takes the next character literally. The backslash itself is kept unless it
    /// escaped a character that would otherwise be special.
    fn handle_escape(&mut self) {
        match self.read_char() {
            Some(c) if is_special(c) => self.current.text.push(c),
            Some(c) => {
                self.current.text.push('\\');
                self.current.text.push(c);
            }
            None => self.current.text.push('\\'),
        }
    }

    fn finish_token(&mut self, out: &mut Vec<RawToken>) {
        let token = std::mem::take(&mut self.current);
        if !token.text.is_empty() {
            out.push(token);
        }
    }
}

fn is_special(ch: char) -> bool {
    matches!(ch, '"' | '=' | '\\') || ch.is_whitespace()
}

/// Splits a line into command, positional and keyword tokens.
///
/// The first unescaped `=` past the first character of a token splits it into a
/// keyword pair. A leading unescaped `=` is dropped and the rest of the token is
/// positional, so `=a=b` passes `a=b` through as a value.
///
/// ```
/// use replkit::lexer::tokenize;
///
/// let tokens = tokenize(r#"Find name="a b" =x=y \=z"#).unwrap();
/// assert_eq!(tokens.command, "find");
/// assert_eq!(tokens.positional, ["x=y", "=z"]);
/// assert_eq!(tokens.keywords["name"], "a b");
/// ```
pub fn tokenize(line: &str) -> Result<Tokens, TokenizeError> {
    let mut raw = LexingFsm::new(line.trim()).make_tokens().into_iter();

    let mut tokens = Tokens {
        command: raw
            .next()
            .map(|t| t.text.to_lowercase())
            .unwrap_or_default(),
        ..Tokens::default()
    };

    for token in raw {
        match token.marker {
            Some(0) => tokens.positional.push(token.text[1..].to_string()),
            Some(at) => {
                let key = token.text[..at].to_string();
                let value = token.text[at + 1..].to_string();
                if tokens.keywords.contains_key(&key) {
                    return Err(TokenizeError::DuplicateKeyword(key));
                }
                tokens.keywords.insert(key, value);
            }
            None => tokens.positional.push(token.text),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional(line: &str) -> Vec<String> {
        tokenize(line).unwrap().positional
    }

    #[test]
    fn test_command_is_lowercased() {
        let tokens = tokenize("ECHO Hello").unwrap();
        assert_eq!(tokens.command, "echo");
        assert_eq!(tokens.positional, ["Hello"]);
        assert!(tokens.keywords.is_empty());
    }

    #[test]
    fn test_quotes_group_whitespace_mid_token() {
        assert_eq!(positional(r#"a b"c d"e"#), ["bc de"]);
        assert_eq!(positional(r#"a "x  y" z"#), ["x  y", "z"]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(positional(r#"a \"b\" c\ d"#), [r#""b""#, "c d"]);
        assert_eq!(positional(r"a \c \\"), [r"\c", r"\"]);
        assert_eq!(positional(r"a x\"), [r"x\"]);
    }

    #[test]
    fn test_keywords_and_leading_marker() {
        let tokens = tokenize(r"cmd k=v =a=b x\=y p").unwrap();
        assert_eq!(tokens.positional, ["a=b", "x=y", "p"]);
        assert_eq!(tokens.keywords.len(), 1);
        assert_eq!(tokens.keywords["k"], "v");

        let tokens = tokenize("cmd k= =").unwrap();
        assert_eq!(tokens.keywords["k"], "");
        assert_eq!(tokens.positional, [""]);
    }

    #[test]
    fn test_only_first_marker_splits() {
        let tokens = tokenize("cmd url=a=b").unwrap();
        assert_eq!(tokens.keywords["url"], "a=b");
    }

    #[test]
    fn test_quoted_keyword_value() {
        let tokens = tokenize(r#"cmd msg="hello world""#).unwrap();
        assert_eq!(tokens.keywords["msg"], "hello world");
    }

    #[test]
    fn test_quoted_marker_still_splits() {
        let tokens = tokenize(r#"kw "c=3" "a b=c d""#).unwrap();
        assert!(tokens.positional.is_empty());
        assert_eq!(tokens.keywords["c"], "3");
        assert_eq!(tokens.keywords["a b"], "c d");

        let tokens = tokenize(r#"kw "=c=3" "c\=3""#).unwrap();
        assert_eq!(tokens.positional, ["c=3", "c=3"]);
        assert!(tokens.keywords.is_empty());
    }

    #[test]
    fn test_duplicate_keyword_rejected() {
        let err = tokenize("cmd k=1 k=2").unwrap_err();
        assert_eq!(err, TokenizeError::DuplicateKeyword("k".into()));
        assert_eq!(err.to_string(), "key k specified twice");
    }

    #[test]
    fn test_unterminated_quote_closes_at_end() {
        assert_eq!(positional(r#"a "b c"#), ["b c"]);
    }

    #[test]
    fn test_empty_quotes_produce_no_token() {
        assert_eq!(positional(r#"a "" b"#), ["b"]);
    }
}
