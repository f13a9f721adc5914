use crate::expr_lexer::{self, ExprToken, LexingError};
use serde_json::Value;

/// How deep parentheses, brackets and prefix operators may nest in one expression.
pub const MAX_NESTING: usize = 100;

/// AST node of a fragment expression.
///
/// Expressions are parsed from fragment text on demand and evaluated against the
/// render context by the interpreter; there is no dynamic evaluation of source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant: number, string, boolean or null.
    Literal(Value),
    /// A name looked up in the context.
    Name(String),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// `{"key": value, ...}`, keys are expressions that must evaluate to strings.
    Dict(Vec<(Expr, Expr)>),
    /// `object.member`
    Member { object: Box<Expr>, member: String },
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// `name(args...)`, restricted to intrinsics and registered functions.
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `and`/`or`, evaluated lazily and yielding the deciding operand.
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Errors that can occur while building an expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsingError {
    /// The fragment text could not be tokenized.
    Lexing(LexingError),
    /// Encountered a token that was not expected at the current position according to the grammar.
    UnexpectedToken(ExprToken),
    /// Reached the end of the fragment while an expression was still open.
    UnexpectedEnd,
    /// The fragment is empty or whitespace only.
    EmptyExpression,
    /// Only bare names can be called, e.g. `f(x)` but not `a.f(x)`.
    InvalidCallTarget,
    /// Sub-expressions nested deeper than [`MAX_NESTING`].
    NestingTooDeep,
}

impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsingError::Lexing(e) => write!(f, "{e}"),
            ParsingError::UnexpectedToken(t) => write!(f, "unexpected token {t:?}"),
            ParsingError::UnexpectedEnd => write!(f, "unexpected end of expression"),
            ParsingError::EmptyExpression => write!(f, "empty expression"),
            ParsingError::InvalidCallTarget => {
                write!(f, "only named functions can be called")
            }
            ParsingError::NestingTooDeep => {
                write!(f, "expression nested more than {MAX_NESTING} levels deep")
            }
        }
    }
}

impl From<LexingError> for ParsingError {
    fn from(e: LexingError) -> Self {
        ParsingError::Lexing(e)
    }
}

struct AstBuilder {
    tokens: Vec<ExprToken>,
    pos: usize,
    depth: usize,
}

impl AstBuilder {
    fn from(tokens: Vec<ExprToken>) -> Self {
        AstBuilder {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse one nested level with `parse`, failing past [`MAX_NESTING`].
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Expr, ParsingError>,
    ) -> Result<Expr, ParsingError> {
        self.deeper()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Account for one more level of AST depth.
    fn deeper(&mut self) -> Result<(), ParsingError> {
        if self.depth >= MAX_NESTING {
            return Err(ParsingError::NestingTooDeep);
        }
        self.depth += 1;
        Ok(())
    }

    fn build_ast(mut self) -> Result<Expr, ParsingError> {
        if self.tokens.is_empty() {
            return Err(ParsingError::EmptyExpression);
        }
        let ast = self.parse_or()?;

        // Ensure we consumed all tokens
        if let Some(token) = self.consume() {
            return Err(ParsingError::UnexpectedToken(token));
        }

        Ok(ast)
    }

    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn peek_n(&self, n: usize) -> Option<&ExprToken> {
        self.tokens.get(self.pos + n)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(ExprToken::Ident(s)) if s == keyword)
    }

    fn consume(&mut self) -> Option<ExprToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: ExprToken) -> Result<(), ParsingError> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ParsingError::UnexpectedToken(token)),
            None => Err(ParsingError::UnexpectedEnd),
        }
    }

    /// or := and (("or" | "||") and)*
    fn parse_or(&mut self) -> Result<Expr, ParsingError> {
        self.nested(Self::parse_or_chain)
    }

    fn parse_or_chain(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") || self.peek() == Some(&ExprToken::OrOr) {
            self.consume();
            self.deeper()?;
            let right = self.parse_and()?;
            left = Expr::Logical {
                left: Box::new(left),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    /// and := not (("and" | "&&") not)*
    fn parse_and(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") || self.peek() == Some(&ExprToken::AndAnd) {
            self.consume();
            self.deeper()?;
            let right = self.parse_not()?;
            left = Expr::Logical {
                left: Box::new(left),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    /// not := ("not" | "!") not | comparison
    fn parse_not(&mut self) -> Result<Expr, ParsingError> {
        if self.peek_keyword("not") || self.peek() == Some(&ExprToken::Bang) {
            self.consume();
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    /// comparison := additive (op additive)*
    fn parse_comparison(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(ExprToken::EqEq) => BinaryOp::Eq,
                Some(ExprToken::NotEq) => BinaryOp::NotEq,
                Some(ExprToken::Lt) => BinaryOp::Lt,
                Some(ExprToken::Le) => BinaryOp::Le,
                Some(ExprToken::Gt) => BinaryOp::Gt,
                Some(ExprToken::Ge) => BinaryOp::Ge,
                Some(ExprToken::Ident(s)) if s == "in" => BinaryOp::In,
                Some(ExprToken::Ident(s))
                    if s == "not"
                        && matches!(self.peek_n(1), Some(ExprToken::Ident(n)) if n == "in") =>
                {
                    BinaryOp::NotIn
                }
                _ => break,
            };
            // `not in` spans two tokens
            if op == BinaryOp::NotIn {
                self.consume();
            }
            self.consume();
            self.deeper()?;
            let right = self.parse_additive()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    /// additive := multiplicative (("+" | "-") multiplicative)*
    fn parse_additive(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(ExprToken::Plus) => BinaryOp::Add,
                Some(ExprToken::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            self.deeper()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    /// multiplicative := unary (("*" | "/" | "%") unary)*
    fn parse_multiplicative(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(ExprToken::Star) => BinaryOp::Mul,
                Some(ExprToken::Slash) => BinaryOp::Div,
                Some(ExprToken::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.consume();
            self.deeper()?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParsingError> {
        if self.peek() == Some(&ExprToken::Minus) {
            self.consume();
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    /// postfix := primary ("." ident | "[" expr "]" | "(" args ")")*
    fn parse_postfix(&mut self) -> Result<Expr, ParsingError> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(
                self.peek(),
                Some(ExprToken::Dot | ExprToken::LBracket | ExprToken::LParen)
            ) {
                self.deeper()?;
            }
            match self.peek() {
                Some(ExprToken::Dot) => {
                    self.consume();
                    let member = match self.consume() {
                        Some(ExprToken::Ident(name)) => name,
                        Some(token) => return Err(ParsingError::UnexpectedToken(token)),
                        None => return Err(ParsingError::UnexpectedEnd),
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        member,
                    };
                }
                Some(ExprToken::LBracket) => {
                    self.consume();
                    let index = self.parse_or()?;
                    self.expect(ExprToken::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(ExprToken::LParen) => {
                    let Expr::Name(name) = expr else {
                        return Err(ParsingError::InvalidCallTarget);
                    };
                    self.consume();
                    let args = self.parse_sequence(ExprToken::RParen)?;
                    expr = Expr::Call { name, args };
                }
                _ => break,
            }
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParsingError> {
        let token = self.consume().ok_or(ParsingError::UnexpectedEnd)?;
        let expr = match token {
            ExprToken::Int(n) => Expr::Literal(Value::from(n)),
            ExprToken::Float(f) => Expr::Literal(Value::from(f)),
            ExprToken::Str(s) => Expr::Literal(Value::String(s)),
            ExprToken::Ident(name) => match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "null" | "none" | "None" => Expr::Literal(Value::Null),
                "and" | "or" | "not" | "in" => {
                    return Err(ParsingError::UnexpectedToken(ExprToken::Ident(name)));
                }
                _ => Expr::Name(name),
            },
            ExprToken::LParen => {
                let inner = self.parse_or()?;
                self.expect(ExprToken::RParen)?;
                inner
            }
            ExprToken::LBracket => Expr::List(self.parse_sequence(ExprToken::RBracket)?),
            ExprToken::LBrace => Expr::Dict(self.parse_dict()?),
            other => return Err(ParsingError::UnexpectedToken(other)),
        };
        Ok(expr)
    }

    /// Comma-separated expressions up to `close`, a trailing comma allowed.
    fn parse_sequence(&mut self, close: ExprToken) -> Result<Vec<Expr>, ParsingError> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&close) {
                self.consume();
                return Ok(items);
            }
            items.push(self.parse_or()?);
            match self.consume() {
                Some(ExprToken::Comma) => {}
                Some(token) if token == close => return Ok(items),
                Some(token) => return Err(ParsingError::UnexpectedToken(token)),
                None => return Err(ParsingError::UnexpectedEnd),
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Vec<(Expr, Expr)>, ParsingError> {
        let mut entries = Vec::new();
        loop {
            if self.peek() == Some(&ExprToken::RBrace) {
                self.consume();
                return Ok(entries);
            }
            let key = self.parse_or()?;
            self.expect(ExprToken::Colon)?;
            let value = self.parse_or()?;
            entries.push((key, value));
            match self.consume() {
                Some(ExprToken::Comma) => {}
                Some(ExprToken::RBrace) => return Ok(entries),
                Some(token) => return Err(ParsingError::UnexpectedToken(token)),
                None => return Err(ParsingError::UnexpectedEnd),
            }
        }
    }
}

/// Parse the text of a fragment into an expression AST.
pub fn parse_expression(source: &str) -> Result<Expr, ParsingError> {
    let tokens = expr_lexer::split_into_expr_tokens(source)?;
    AstBuilder::from(tokens).build_ast()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Expr {
        Expr::Name(s.to_string())
    }

    fn int(n: i64) -> Expr {
        Expr::Literal(Value::from(n))
    }

    #[test]
    fn test_precedence_of_arithmetic() {
        let ast = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            ast,
            Expr::Binary {
                left: Box::new(int(1)),
                op: BinaryOp::Add,
                right: Box::new(Expr::Binary {
                    left: Box::new(int(2)),
                    op: BinaryOp::Mul,
                    right: Box::new(int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_not_binds_looser_than_comparison() {
        let ast = parse_expression("not a == b").unwrap();
        let Expr::Unary { op, operand } = ast else {
            panic!("Expected unary not");
        };
        assert_eq!(op, UnaryOp::Not);
        assert!(matches!(*operand, Expr::Binary { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn test_not_in_operator() {
        let ast = parse_expression("x not in items").unwrap();
        assert_eq!(
            ast,
            Expr::Binary {
                left: Box::new(name("x")),
                op: BinaryOp::NotIn,
                right: Box::new(name("items")),
            }
        );
    }

    #[test]
    fn test_postfix_chain() {
        let ast = parse_expression("users[0].name").unwrap();
        assert_eq!(
            ast,
            Expr::Member {
                object: Box::new(Expr::Index {
                    object: Box::new(name("users")),
                    index: Box::new(int(0)),
                }),
                member: "name".to_string(),
            }
        );
    }

    #[test]
    fn test_call_with_dict_argument() {
        let ast = parse_expression(r#"include("b.txt", {"who": name})"#).unwrap();
        assert_eq!(
            ast,
            Expr::Call {
                name: "include".to_string(),
                args: vec![
                    Expr::Literal(Value::String("b.txt".to_string())),
                    Expr::Dict(vec![(
                        Expr::Literal(Value::String("who".to_string())),
                        name("name"),
                    )]),
                ],
            }
        );
    }

    #[test]
    fn test_literals_and_trailing_comma() {
        assert_eq!(
            parse_expression("[1, True, none,]").unwrap(),
            Expr::List(vec![
                int(1),
                Expr::Literal(Value::Bool(true)),
                Expr::Literal(Value::Null),
            ])
        );
        assert_eq!(parse_expression("[]").unwrap(), Expr::List(vec![]));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = |open: &str, close: &str, n: usize| {
            format!("{}1{}", open.repeat(n), close.repeat(n))
        };
        assert_eq!(
            parse_expression(&deep("(", ")", 100_000)),
            Err(ParsingError::NestingTooDeep)
        );
        assert_eq!(
            parse_expression(&deep("[", "]", 100_000)),
            Err(ParsingError::NestingTooDeep)
        );
        assert_eq!(
            parse_expression(&deep("not ", "", 100_000)),
            Err(ParsingError::NestingTooDeep)
        );
        assert_eq!(
            parse_expression(&deep("-", "", 100_000)),
            Err(ParsingError::NestingTooDeep)
        );
        assert_eq!(parse_expression(&deep("(", ")", 50)).unwrap(), int(1));
    }

    #[test]
    fn test_long_chains_count_towards_nesting() {
        let sum = format!("1{}", " + 1".repeat(100_000));
        assert_eq!(parse_expression(&sum), Err(ParsingError::NestingTooDeep));
        let members = format!("a{}", ".b".repeat(100_000));
        assert_eq!(parse_expression(&members), Err(ParsingError::NestingTooDeep));
        let either = format!("a{}", " or a".repeat(100_000));
        assert_eq!(parse_expression(&either), Err(ParsingError::NestingTooDeep));

        assert!(parse_expression(&format!("1{}", " + 1".repeat(50))).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_expression("   "), Err(ParsingError::EmptyExpression));
        assert_eq!(parse_expression("(1"), Err(ParsingError::UnexpectedEnd));
        assert_eq!(
            parse_expression("a.b(1)"),
            Err(ParsingError::InvalidCallTarget)
        );
        assert_eq!(
            parse_expression("1 2"),
            Err(ParsingError::UnexpectedToken(ExprToken::Int(2)))
        );
        assert!(matches!(
            parse_expression("'x"),
            Err(ParsingError::Lexing(LexingError::UnfinishedString))
        ));
    }
}
