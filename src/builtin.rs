use crate::env::Context;
use crate::error::{EvalError, TemplateError};
use crate::external;
use crate::function::TemplateFunction;
use crate::value;
use anyhow::{Context as _, anyhow, bail};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Longest list `range(...)` will build.
const MAX_RANGE_LEN: i64 = 1_000_000;

/// Callables built into every render: `set`, `include`, `expect` and `shell`.
///
/// They are resolved before host functions, so a host cannot shadow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intrinsic {
    Set,
    Include,
    Expect,
    Shell,
}

/// What an intrinsic may touch while it runs.
///
/// Implemented by the renderer; keeps intrinsics apart from the interpreter's
/// cursor and collector bookkeeping.
pub(crate) trait Scope {
    /// Bind `name` in the context of the current render.
    fn bind(&mut self, name: String, value: Value);

    /// Render the template at `path` with `overrides` layered over the current context.
    fn include(&mut self, path: &str, overrides: Context) -> Result<String, TemplateError>;

    /// Directory `shell()` commands run in.
    fn working_dir(&self) -> Option<&Path>;
}

impl Intrinsic {
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        match name {
            "set" => Some(Intrinsic::Set),
            "include" => Some(Intrinsic::Include),
            "expect" => Some(Intrinsic::Expect),
            "shell" => Some(Intrinsic::Shell),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Intrinsic::Set => "set",
            Intrinsic::Include => "include",
            Intrinsic::Expect => "expect",
            Intrinsic::Shell => "shell",
        }
    }

    /// Executes the intrinsic with evaluated arguments.
    pub(crate) fn call(self, scope: &mut dyn Scope, args: Vec<Value>) -> Result<Value, EvalError> {
        match self {
            Intrinsic::Set => {
                let [name, value] = self.arguments::<2, 2>(args)?;
                let Value::String(name) = name else {
                    return Err(EvalError::invalid("set(): the name must be a string"));
                };
                scope.bind(name, value);
                Ok(Value::Null)
            }
            Intrinsic::Include => {
                let [path, overrides] = self.arguments::<1, 2>(args)?;
                let Value::String(path) = path else {
                    return Err(EvalError::invalid("include(): the path must be a string"));
                };
                let overrides = match overrides {
                    Value::Null => Context::new(),
                    Value::Object(map) => Context::from(map),
                    other => {
                        return Err(EvalError::invalid(format!(
                            "include(): the context must be a dict, not {}",
                            value::type_name(&other)
                        )));
                    }
                };
                Ok(Value::String(scope.include(&path, overrides)?))
            }
            Intrinsic::Expect => {
                let [condition, message] = self.arguments::<1, 2>(args)?;
                if value::is_truthy(&condition) {
                    return Ok(Value::Null);
                }
                let message = match message {
                    Value::Null => "expectation failed".to_string(),
                    other => value::to_output_string(&other),
                };
                Err(TemplateError::Assertion(message).into())
            }
            Intrinsic::Shell => {
                let [command] = self.arguments::<1, 1>(args)?;
                let Value::String(command) = command else {
                    return Err(EvalError::invalid("shell(): the command must be a string"));
                };
                Ok(Value::String(external::run_shell(
                    &command,
                    scope.working_dir(),
                )?))
            }
        }
    }

    /// Check arity and pad optional trailing arguments with null.
    fn arguments<const MIN: usize, const MAX: usize>(
        self,
        args: Vec<Value>,
    ) -> Result<[Value; MAX], EvalError> {
        if args.len() < MIN || args.len() > MAX {
            return Err(EvalError::invalid(format!(
                "{}() takes {} argument(s), got {}",
                self.name(),
                if MIN == MAX {
                    MIN.to_string()
                } else {
                    format!("{MIN} to {MAX}")
                },
                args.len()
            )));
        }
        let mut padded = args.into_iter();
        Ok(std::array::from_fn(|_| padded.next().unwrap_or(Value::Null)))
    }
}

fn expect_args<'a>(name: &str, args: &'a [Value], min: usize, max: usize) -> anyhow::Result<&'a [Value]> {
    if args.len() < min || args.len() > max {
        bail!("{name}() takes {min} to {max} argument(s), got {}", args.len());
    }
    Ok(args)
}

fn string_arg<'a>(name: &str, value: &'a Value) -> anyhow::Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("{name}() expects a string, got {}", value::type_name(value)))
}

fn int_arg(name: &str, value: &Value) -> anyhow::Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("{name}() expects an integer, got {}", value::type_name(value)))
}

fn len(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("len", args, 1, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => bail!("len() of {} is undefined", value::type_name(other)),
    };
    Ok(Value::from(n))
}

fn stringify(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("str", args, 1, 1)?;
    Ok(Value::String(value::to_output_string(&args[0])))
}

fn integer(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("int", args, 1, 1)?;
    let n = match &args[0] {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => n.as_f64().map(|f| f.trunc() as i64).unwrap_or_default(),
        },
        Value::Bool(b) => *b as i64,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("int(): invalid literal {s:?}"))?,
        other => bail!("int() of {} is undefined", value::type_name(other)),
    };
    Ok(Value::from(n))
}

fn range(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("range", args, 1, 2)?;
    let (start, stop) = match args {
        [stop] => (0, int_arg("range", stop)?),
        [start, stop] => (int_arg("range", start)?, int_arg("range", stop)?),
        _ => unreachable!("arity checked above"),
    };
    if stop.saturating_sub(start) > MAX_RANGE_LEN {
        bail!("range() of more than {MAX_RANGE_LEN} items");
    }
    Ok(Value::Array((start..stop).map(Value::from).collect()))
}

fn join(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("join", args, 1, 2)?;
    let Value::Array(items) = &args[0] else {
        bail!("join() expects a list, got {}", value::type_name(&args[0]));
    };
    let separator = match args.get(1) {
        Some(sep) => string_arg("join", sep)?,
        None => "",
    };
    let parts: Vec<String> = items.iter().map(value::to_output_string).collect();
    Ok(Value::String(parts.join(separator)))
}

fn upper(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("upper", args, 1, 1)?;
    Ok(Value::String(string_arg("upper", &args[0])?.to_uppercase()))
}

fn lower(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("lower", args, 1, 1)?;
    Ok(Value::String(string_arg("lower", &args[0])?.to_lowercase()))
}

fn trim(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("trim", args, 1, 1)?;
    Ok(Value::String(string_arg("trim", &args[0])?.trim().to_string()))
}

fn env_var(args: &[Value]) -> anyhow::Result<Value> {
    let args = expect_args("env", args, 1, 1)?;
    let name = string_arg("env", &args[0])?;
    Ok(std::env::var(name).map(Value::String).unwrap_or(Value::Null))
}

/// The host functions installed by [`Functions::standard`](crate::Functions::standard).
pub(crate) fn standard_functions() -> Vec<(&'static str, Arc<dyn TemplateFunction>)> {
    let functions: [(&'static str, Arc<dyn TemplateFunction>); 9] = [
        ("len", Arc::new(len)),
        ("str", Arc::new(stringify)),
        ("int", Arc::new(integer)),
        ("range", Arc::new(range)),
        ("join", Arc::new(join)),
        ("upper", Arc::new(upper)),
        ("lower", Arc::new(lower)),
        ("trim", Arc::new(trim)),
        ("env", Arc::new(env_var)),
    ];
    functions.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingScope {
        bound: Vec<(String, Value)>,
        included: Vec<(String, Context)>,
    }

    impl Scope for RecordingScope {
        fn bind(&mut self, name: String, value: Value) {
            self.bound.push((name, value));
        }

        fn include(&mut self, path: &str, overrides: Context) -> Result<String, TemplateError> {
            self.included.push((path.to_string(), overrides));
            Ok(format!("<{path}>"))
        }

        fn working_dir(&self) -> Option<&Path> {
            None
        }
    }

    #[test]
    fn test_lookup_names() {
        for name in ["set", "include", "expect", "shell"] {
            assert_eq!(Intrinsic::lookup(name).map(Intrinsic::name), Some(name));
        }
        assert_eq!(Intrinsic::lookup("len"), None);
    }

    #[test]
    fn test_set_binds_into_scope() {
        let mut scope = RecordingScope::default();
        let ret = Intrinsic::Set
            .call(&mut scope, vec![json!("name"), json!("bob")])
            .unwrap();
        assert_eq!(ret, Value::Null);
        assert_eq!(scope.bound, vec![("name".to_string(), json!("bob"))]);

        assert!(matches!(
            Intrinsic::Set.call(&mut scope, vec![json!(1), json!(2)]),
            Err(EvalError::Invalid(_))
        ));
        assert!(matches!(
            Intrinsic::Set.call(&mut scope, vec![json!("only")]),
            Err(EvalError::Invalid(_))
        ));
    }

    #[test]
    fn test_include_passes_overrides() {
        let mut scope = RecordingScope::default();
        let ret = Intrinsic::Include
            .call(&mut scope, vec![json!("b.txt"), json!({"who": "me"})])
            .unwrap();
        assert_eq!(ret, json!("<b.txt>"));
        assert_eq!(scope.included[0].0, "b.txt");
        assert_eq!(scope.included[0].1.get_var("who"), Some(&json!("me")));

        let ret = Intrinsic::Include.call(&mut scope, vec![json!("c.txt")]).unwrap();
        assert_eq!(ret, json!("<c.txt>"));
        assert!(scope.included[1].1.is_empty());

        assert!(Intrinsic::Include
            .call(&mut scope, vec![json!("d.txt"), json!([1])])
            .is_err());
    }

    #[test]
    fn test_expect_carries_message() {
        let mut scope = RecordingScope::default();
        assert!(Intrinsic::Expect
            .call(&mut scope, vec![json!(true), json!("never")])
            .is_ok());

        let err = Intrinsic::Expect
            .call(&mut scope, vec![json!(0), json!("count must be positive")])
            .unwrap_err();
        match err {
            EvalError::Fatal(e) => {
                assert!(matches!(*e, TemplateError::Assertion(ref m) if m == "count must be positive"))
            }
            other => panic!("Expected fatal assertion, got {:?}", other),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_shell_returns_stdout() {
        let mut scope = RecordingScope::default();
        let ret = Intrinsic::Shell
            .call(&mut scope, vec![json!("printf abc")])
            .unwrap();
        assert_eq!(ret, json!("abc"));

        let err = Intrinsic::Shell
            .call(&mut scope, vec![json!("exit 1")])
            .unwrap_err();
        assert!(matches!(err, EvalError::Fatal(ref e) if matches!(**e, TemplateError::Process { .. })));
    }

    #[test]
    fn test_standard_functions() {
        assert_eq!(len(&[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(len(&[json!([1, 2])]).unwrap(), json!(2));
        assert!(len(&[json!(1)]).is_err());

        assert_eq!(stringify(&[json!(1.5)]).unwrap(), json!("1.5"));
        assert_eq!(integer(&[json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(integer(&[json!(3.9)]).unwrap(), json!(3));
        assert!(integer(&[json!("x")]).is_err());

        assert_eq!(range(&[json!(3)]).unwrap(), json!([0, 1, 2]));
        assert_eq!(range(&[json!(2), json!(4)]).unwrap(), json!([2, 3]));
        assert_eq!(range(&[json!(5), json!(1)]).unwrap(), json!([]));
        assert!(range(&[json!(0), json!(i64::MAX)]).is_err());

        assert_eq!(join(&[json!(["a", 1]), json!(", ")]).unwrap(), json!("a, 1"));
        assert_eq!(upper(&[json!("ab")]).unwrap(), json!("AB"));
        assert_eq!(lower(&[json!("AB")]).unwrap(), json!("ab"));
        assert_eq!(trim(&[json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(
            env_var(&[json!("SCRIPT_TEMPLATES_SURELY_UNSET_VAR")]).unwrap(),
            Value::Null
        );
    }
}
