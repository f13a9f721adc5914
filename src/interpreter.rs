//! The token-stream interpreter.
//!
//! Tokens are consumed front to back through a [`Cursor`]. Nested `if`/`for`
//! bodies are evaluated by recursive calls sharing the same cursor, so block
//! boundaries (`else`, `end`) are discovered by consumption order instead of a
//! precomputed tree: a body scan stops when it meets an `else` or `end`, steps the
//! cursor back, and lets the enclosing construct consume it.

use crate::builtin::{Intrinsic, Scope};
use crate::env::{Context, Scoping};
use crate::error::{EvalError, Result, TemplateError};
use crate::lexer::Token;
use crate::parser::{self, Expr, LogicalOp, UnaryOp};
use crate::template::Template;
use crate::value;
use log::{debug, trace, warn};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([_a-zA-Z]\w*)\s*=\s*([^=].*)$").expect("assignment pattern is valid")
});

/// How deep `if`/`for` blocks may nest inside one template.
const MAX_BLOCK_DEPTH: usize = 100;

static FOR_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^for\s+([_a-zA-Z]\w*)\s+in\s+(.+)$").expect("for pattern is valid")
});

/// Index-based cursor over an immutable token array.
///
/// Saving and restoring a position is a plain index copy, which is how `for`
/// replays its body once per item.
pub(crate) struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(tokens: &'t [Token]) -> Self {
        Cursor { tokens, pos: 0 }
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Un-consume the token returned by the last [`Cursor::next`].
    fn push_back(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }
}

/// The shape of a code fragment, matched in priority order.
#[derive(Debug, PartialEq, Eq)]
enum Statement<'a> {
    Comment,
    Assign { name: &'a str, expr: &'a str },
    If { condition: &'a str },
    Else,
    For { variable: &'a str, iterable: &'a str },
    End,
    Expr(&'a str),
}

fn classify(fragment: &str) -> Statement<'_> {
    if fragment.starts_with('#') {
        return Statement::Comment;
    }
    if let Some(caps) = ASSIGNMENT.captures(fragment) {
        if let (Some(name), Some(expr)) = (caps.get(1), caps.get(2)) {
            return Statement::Assign {
                name: name.as_str(),
                expr: expr.as_str(),
            };
        }
    }
    if let Some(condition) = fragment.strip_prefix("if") {
        if condition.starts_with(char::is_whitespace) {
            return Statement::If {
                condition: condition.trim_start(),
            };
        }
    }
    if fragment == "else" {
        return Statement::Else;
    }
    if let Some(caps) = FOR_LOOP.captures(fragment) {
        if let (Some(variable), Some(iterable)) = (caps.get(1), caps.get(2)) {
            return Statement::For {
                variable: variable.as_str(),
                iterable: iterable.as_str(),
            };
        }
    }
    if fragment == "end" {
        return Statement::End;
    }
    Statement::Expr(fragment)
}

/// Why a body scan stopped.
#[derive(Debug, PartialEq, Eq)]
enum Boundary {
    Else,
    End,
    Eof,
}

/// Consume the token a body scan stopped on.
fn take_boundary(cursor: &mut Cursor<'_>) -> Boundary {
    match cursor.next().map(|token| classify(token.text().trim())) {
        Some(Statement::Else) => Boundary::Else,
        Some(Statement::End) => Boundary::End,
        _ => Boundary::Eof,
    }
}

/// State of one render pass over one template.
pub(crate) struct Renderer<'a> {
    template: &'a Template,
    context: &'a mut Context,
    undefined_names: Option<&'a mut Vec<String>>,
    depth: usize,
    blocks: usize,
}

/// Render `template` against `context`, which is mutated in place.
///
/// `depth` is the include nesting level of `template`, zero for the outermost one.
pub(crate) fn render_tokens(
    template: &Template,
    context: &mut Context,
    undefined_names: Option<&mut Vec<String>>,
    depth: usize,
) -> Result<String> {
    let mut renderer = Renderer {
        template,
        context,
        undefined_names,
        depth,
        blocks: 0,
    };
    let mut cursor = Cursor::new(template.tokens());
    let fragments = renderer.eval_tokens(&mut cursor, true)?;

    // a top-level scan only stops early on a stray `else` or `end`
    if let Some(token) = cursor.next() {
        let keyword = token.text().trim();
        return Err(TemplateError::structural(
            keyword,
            format!("`{keyword}` without a matching `if` or `for`"),
        ));
    }

    Ok(fragments.concat())
}

impl Renderer<'_> {
    /// Evaluate tokens until the cursor is exhausted or an `else`/`end` is met.
    ///
    /// With `should_eval` false the tokens are only scanned for block structure:
    /// literals are dropped and no expression is evaluated.
    fn eval_tokens(&mut self, cursor: &mut Cursor<'_>, should_eval: bool) -> Result<Vec<String>> {
        let mut out = Vec::new();

        while let Some(token) = cursor.next() {
            let fragment = match token {
                Token::Text(text) => {
                    if should_eval {
                        out.push(text.clone());
                    }
                    continue;
                }
                Token::Code(code) => code.trim(),
            };

            let statement = classify(fragment);
            trace!("{:?} (eval: {})", statement, should_eval);

            match statement {
                Statement::Comment => {}
                Statement::Assign { name, expr } => {
                    if should_eval {
                        let value = self.evaluate(fragment, expr)?;
                        self.context.set_var(name, value);
                    }
                }
                Statement::If { condition } => self.block("if", fragment, |r| {
                    r.eval_if(cursor, fragment, condition, should_eval, &mut out)
                })?,
                Statement::For { variable, iterable } => self.block("for", fragment, |r| {
                    r.eval_for(cursor, fragment, variable, iterable, should_eval, &mut out)
                })?,
                Statement::Else | Statement::End => {
                    cursor.push_back();
                    return Ok(out);
                }
                Statement::Expr(expr) => {
                    if should_eval {
                        let value = self.evaluate(fragment, expr)?;
                        if !value.is_null() {
                            out.push(value::to_output_string(&value));
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Run `body` one block level deeper, failing once the nesting limit is hit.
    fn block(
        &mut self,
        construct: &str,
        fragment: &str,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if self.blocks >= MAX_BLOCK_DEPTH {
            return Err(TemplateError::structural(
                construct,
                format!("`{fragment}` is nested more than {MAX_BLOCK_DEPTH} blocks deep"),
            ));
        }
        self.blocks += 1;
        let result = body(self);
        self.blocks -= 1;
        result
    }

    fn eval_if(
        &mut self,
        cursor: &mut Cursor<'_>,
        fragment: &str,
        condition: &str,
        should_eval: bool,
        out: &mut Vec<String>,
    ) -> Result<()> {
        let taken = should_eval && value::is_truthy(&self.evaluate(fragment, condition)?);

        out.extend(self.eval_tokens(cursor, taken)?);

        match take_boundary(cursor) {
            Boundary::End => Ok(()),
            Boundary::Else => {
                out.extend(self.eval_tokens(cursor, should_eval && !taken)?);
                match take_boundary(cursor) {
                    Boundary::End => Ok(()),
                    Boundary::Else => Err(TemplateError::structural(
                        "else",
                        format!("second `else` for `{fragment}`"),
                    )),
                    Boundary::Eof => Err(TemplateError::structural(
                        "if",
                        format!("`{fragment}` has no `end`"),
                    )),
                }
            }
            Boundary::Eof => Err(TemplateError::structural(
                "if",
                format!("`{fragment}` has no `end`"),
            )),
        }
    }

    fn eval_for(
        &mut self,
        cursor: &mut Cursor<'_>,
        fragment: &str,
        variable: &str,
        iterable: &str,
        should_eval: bool,
        out: &mut Vec<String>,
    ) -> Result<()> {
        let items = if should_eval {
            let value = self.evaluate(fragment, iterable)?;
            value::iterate(&value).map_err(|e| self.fail(fragment, e))?
        } else {
            Vec::new()
        };

        let body = cursor.position();
        if items.is_empty() {
            // still walk the body once so the cursor lands on this loop's `end`
            self.eval_tokens(cursor, false)?;
        } else {
            let previous = self.context.get_var(variable).cloned();
            for item in items {
                self.context.set_var(variable, item);
                cursor.restore(body);
                out.extend(self.eval_tokens(cursor, true)?);
            }
            if self.template.options().scoping == Scoping::Isolated {
                match previous {
                    Some(value) => self.context.set_var(variable, value),
                    None => self.context.remove_var(variable),
                };
            }
        }

        match take_boundary(cursor) {
            Boundary::End => Ok(()),
            Boundary::Else => Err(TemplateError::structural(
                "else",
                format!("`else` inside the body of `{fragment}`"),
            )),
            Boundary::Eof => Err(TemplateError::structural(
                "for",
                format!("`{fragment}` has no `end`"),
            )),
        }
    }

    /// Parse and evaluate `source`, applying the undefined-name policy.
    ///
    /// With a collector, an undefined name is recorded once and the expression
    /// evaluates to null; without one it is an error.
    fn evaluate(&mut self, fragment: &str, source: &str) -> Result<Value> {
        let expr = parser::parse_expression(source).map_err(|e| TemplateError::Syntax {
            fragment: fragment.to_string(),
            message: e.to_string(),
        })?;

        match self.eval_expr(&expr) {
            Ok(value) => Ok(value),
            Err(EvalError::UndefinedName(name)) => match self.undefined_names.as_deref_mut() {
                Some(names) => {
                    warn!("Undefined name: {}", name);
                    if !names.contains(&name) {
                        names.push(name);
                    }
                    Ok(Value::Null)
                }
                None => Err(TemplateError::UndefinedName(name)),
            },
            Err(e) => Err(self.fail(fragment, e)),
        }
    }

    fn fail(&self, fragment: &str, error: EvalError) -> TemplateError {
        match error {
            EvalError::UndefinedName(name) => TemplateError::UndefinedName(name),
            EvalError::Invalid(message) => TemplateError::Evaluation {
                fragment: fragment.to_string(),
                message,
            },
            EvalError::Fatal(e) => *e,
        }
    }

    fn eval_expr(&mut self, expr: &Expr) -> std::result::Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self
                .context
                .get_var(name)
                .cloned()
                .ok_or_else(|| EvalError::UndefinedName(name.clone())),
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval_expr(item))
                    .collect::<std::result::Result<_, _>>()?,
            )),
            Expr::Dict(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let Value::String(key) = self.eval_expr(key)? else {
                        return Err(EvalError::invalid("dict keys must be strings"));
                    };
                    let value = self.eval_expr(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            Expr::Member { object, member } => {
                let object = self.eval_expr(object)?;
                value::member(&object, member)
            }
            Expr::Index { object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                value::index(&object, &index)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::Unary { op, operand } => {
                let operand = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value::is_truthy(&operand))),
                    UnaryOp::Neg => value::negate(&operand),
                }
            }
            Expr::Binary { left, op, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                value::binary(*op, &left, &right)
            }
            Expr::Logical { left, op, right } => {
                let left = self.eval_expr(left)?;
                let decided = match op {
                    LogicalOp::And => !value::is_truthy(&left),
                    LogicalOp::Or => value::is_truthy(&left),
                };
                if decided {
                    Ok(left)
                } else {
                    self.eval_expr(right)
                }
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> std::result::Result<Value, EvalError> {
        let intrinsic = Intrinsic::lookup(name);
        let template = self.template;
        let function = template.functions().get(name);
        if intrinsic.is_none() && function.is_none() {
            return Err(EvalError::UndefinedName(name.to_string()));
        }

        let args = args
            .iter()
            .map(|arg| self.eval_expr(arg))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match (intrinsic, function) {
            (Some(intrinsic), _) => intrinsic.call(self, args),
            (None, Some(function)) => function
                .call(&args)
                .map_err(|e| EvalError::invalid(format!("{name}(): {e:#}"))),
            (None, None) => Err(EvalError::UndefinedName(name.to_string())),
        }
    }
}

impl Scope for Renderer<'_> {
    fn bind(&mut self, name: String, value: Value) {
        self.context.set_var(name, value);
    }

    fn include(&mut self, path: &str, overrides: Context) -> Result<String> {
        let options = self.template.options();
        let depth = self.depth + 1;
        if depth > options.max_include_depth {
            return Err(TemplateError::IncludeDepth {
                path: path.to_string(),
                limit: options.max_include_depth,
            });
        }

        let resolved = match self.template.file_locator() {
            Some(locate) => {
                locate(path).ok_or_else(|| TemplateError::IncludeNotFound(path.to_string()))?
            }
            None => PathBuf::from(path),
        };
        debug!("include `{}` -> {} (depth {})", path, resolved.display(), depth);

        let text =
            std::fs::read_to_string(&resolved).map_err(|e| TemplateError::io(&resolved, e))?;
        let nested = self.template.nested(&text);

        match options.scoping {
            Scoping::Dynamic => {
                // overrides are visible to the include only; its own bindings stay
                let shadowed: Vec<(String, Option<Value>)> = overrides
                    .iter()
                    .map(|(name, _)| (name.clone(), self.context.get_var(name).cloned()))
                    .collect();
                self.context.merge(&overrides);
                let rendered = render_tokens(
                    &nested,
                    self.context,
                    self.undefined_names.as_deref_mut(),
                    depth,
                );
                for (name, previous) in shadowed {
                    match previous {
                        Some(value) => self.context.set_var(name, value),
                        None => self.context.remove_var(&name),
                    };
                }
                rendered
            }
            Scoping::Isolated => {
                let mut local = self.context.clone();
                local.merge(&overrides);
                render_tokens(&nested, &mut local, self.undefined_names.as_deref_mut(), depth)
            }
        }
    }

    fn working_dir(&self) -> Option<&Path> {
        self.template.options().working_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        assert_eq!(classify("# note"), Statement::Comment);
        assert_eq!(
            classify("name = \"bob\""),
            Statement::Assign {
                name: "name",
                expr: "\"bob\""
            }
        );
        assert_eq!(classify("x == 1"), Statement::Expr("x == 1"));
        assert_eq!(classify("x <= 1"), Statement::Expr("x <= 1"));
        assert_eq!(classify("if x"), Statement::If { condition: "x" });
        assert_eq!(classify("if\n  x"), Statement::If { condition: "x" });
        assert_eq!(classify("iffy"), Statement::Expr("iffy"));
        assert_eq!(classify("else"), Statement::Else);
        assert_eq!(
            classify("for item in items"),
            Statement::For {
                variable: "item",
                iterable: "items"
            }
        );
        assert_eq!(classify("end"), Statement::End);
        assert_eq!(classify("ending"), Statement::Expr("ending"));
        assert_eq!(classify(""), Statement::Expr(""));
    }

    #[test]
    fn test_cursor_push_back_and_restore() {
        let tokens = vec![
            Token::Text("a".to_string()),
            Token::Code("end".to_string()),
        ];
        let mut cursor = Cursor::new(&tokens);
        let start = cursor.position();

        assert_eq!(cursor.next(), Some(&tokens[0]));
        assert_eq!(cursor.next(), Some(&tokens[1]));
        cursor.push_back();
        assert_eq!(cursor.next(), Some(&tokens[1]));
        assert_eq!(cursor.next(), None);

        cursor.restore(start);
        assert_eq!(cursor.next(), Some(&tokens[0]));
    }
}
