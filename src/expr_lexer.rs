//! Lexical analysis of the expression language used inside fragments.

/// Represents a token of a fragment expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprToken {
    /// An identifier or keyword (`and`, `or`, `not`, `in`, `true`, ...).
    Ident(String),
    Int(i64),
    Float(f64),
    /// A quoted string with escapes already resolved.
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexingError {
    /// A closing quote (single or double) was not found.
    UnfinishedString,
    /// A character that starts no token, e.g. `@` or a lone `=`.
    UnexpectedChar(char),
    /// An integer literal that does not fit in 64 bits.
    NumberOutOfRange(String),
}

impl std::fmt::Display for LexingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexingError::UnfinishedString => write!(f, "unterminated string literal"),
            LexingError::UnexpectedChar(c) => write!(f, "unexpected character `{c}`"),
            LexingError::NumberOutOfRange(s) => write!(f, "number `{s}` is out of range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingIdent,
    ReadingNumber { seen_dot: bool },
    ReadingString { quote: char, escaped: bool },
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(source: &str) -> Self {
        LexingFSM {
            input: source.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<ExprToken>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.peek_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out)?,
                LexingState::ReadingIdent => self.handle_ident(ch, &mut out),
                LexingState::ReadingNumber { seen_dot } => {
                    self.handle_number(ch, seen_dot, &mut out)?
                }
                LexingState::ReadingString { quote, escaped } => {
                    self.handle_string(ch, quote, escaped, &mut out)
                }
            }
        }

        match self.state {
            LexingState::ReadingString { .. } => return Err(LexingError::UnfinishedString),
            LexingState::ReadingIdent => out.push(ExprToken::Ident(self.take_buffer())),
            LexingState::ReadingNumber { .. } => out.push(self.finish_number()?),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_next_char(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Consume `ch` and, when the following char is `second`, that one too.
    fn one_or_two(&mut self, second: char, single: ExprToken, double: ExprToken) -> ExprToken {
        self.read_char();
        if self.peek_char() == Some(second) {
            self.read_char();
            double
        } else {
            single
        }
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<ExprToken>) -> Result<(), LexingError> {
        let token = match ch {
            c if c.is_whitespace() => {
                self.read_char();
                return Ok(());
            }
            c if c.is_ascii_digit() => {
                self.state = LexingState::ReadingNumber { seen_dot: false };
                return Ok(());
            }
            c if c.is_alphabetic() || c == '_' => {
                self.state = LexingState::ReadingIdent;
                return Ok(());
            }
            '\'' | '"' => {
                self.read_char();
                self.state = LexingState::ReadingString {
                    quote: ch,
                    escaped: false,
                };
                return Ok(());
            }
            '(' => ExprToken::LParen,
            ')' => ExprToken::RParen,
            '[' => ExprToken::LBracket,
            ']' => ExprToken::RBracket,
            '{' => ExprToken::LBrace,
            '}' => ExprToken::RBrace,
            ',' => ExprToken::Comma,
            ':' => ExprToken::Colon,
            '.' => ExprToken::Dot,
            '+' => ExprToken::Plus,
            '-' => ExprToken::Minus,
            '*' => ExprToken::Star,
            '/' => ExprToken::Slash,
            '%' => ExprToken::Percent,
            '<' => {
                out.push(self.one_or_two('=', ExprToken::Lt, ExprToken::Le));
                return Ok(());
            }
            '>' => {
                out.push(self.one_or_two('=', ExprToken::Gt, ExprToken::Ge));
                return Ok(());
            }
            '!' => {
                out.push(self.one_or_two('=', ExprToken::Bang, ExprToken::NotEq));
                return Ok(());
            }
            '=' if self.peek_next_char() == Some('=') => {
                self.read_char();
                ExprToken::EqEq
            }
            '&' if self.peek_next_char() == Some('&') => {
                self.read_char();
                ExprToken::AndAnd
            }
            '|' if self.peek_next_char() == Some('|') => {
                self.read_char();
                ExprToken::OrOr
            }
            c => return Err(LexingError::UnexpectedChar(c)),
        };
        self.read_char();
        out.push(token);
        Ok(())
    }

    fn handle_ident(&mut self, ch: char, out: &mut Vec<ExprToken>) {
        if ch.is_alphanumeric() || ch == '_' {
            self.read_char();
            self.buffer.push(ch);
        } else {
            out.push(ExprToken::Ident(self.take_buffer()));
            self.state = LexingState::Start;
        }
    }

    fn handle_number(
        &mut self,
        ch: char,
        seen_dot: bool,
        out: &mut Vec<ExprToken>,
    ) -> Result<(), LexingError> {
        match ch {
            c if c.is_ascii_digit() || c == '_' => {
                self.read_char();
                if c != '_' {
                    self.buffer.push(c);
                }
            }
            // `1.5` continues the number, `items.0`-style access never starts with a digit
            '.' if !seen_dot && self.peek_next_char().is_some_and(|c| c.is_ascii_digit()) => {
                self.read_char();
                self.buffer.push('.');
                self.state = LexingState::ReadingNumber { seen_dot: true };
            }
            _ => {
                out.push(self.finish_number()?);
                self.state = LexingState::Start;
            }
        }
        Ok(())
    }

    fn finish_number(&mut self) -> Result<ExprToken, LexingError> {
        let text = self.take_buffer();
        if text.contains('.') {
            text.parse::<f64>()
                .map(ExprToken::Float)
                .map_err(|_| LexingError::NumberOutOfRange(text))
        } else {
            text.parse::<i64>()
                .map(ExprToken::Int)
                .map_err(|_| LexingError::NumberOutOfRange(text))
        }
    }

    fn handle_string(&mut self, ch: char, quote: char, escaped: bool, out: &mut Vec<ExprToken>) {
        self.read_char();
        if escaped {
            let resolved = match ch {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            };
            self.buffer.push(resolved);
            self.state = LexingState::ReadingString {
                quote,
                escaped: false,
            };
        } else if ch == '\\' {
            self.state = LexingState::ReadingString {
                quote,
                escaped: true,
            };
        } else if ch == quote {
            out.push(ExprToken::Str(self.take_buffer()));
            self.state = LexingState::Start;
        } else {
            self.buffer.push(ch);
        }
    }
}

/// Tokenize the text of one fragment expression.
pub fn split_into_expr_tokens(source: &str) -> Result<Vec<ExprToken>, LexingError> {
    let mut lexer = LexingFSM::new(source);
    lexer.make_tokens()
}
