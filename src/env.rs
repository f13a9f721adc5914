use serde_json::{Map, Value};
use std::collections::HashMap;

/// How bindings made inside a block or an include relate to the enclosing render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scoping {
    /// One context is shared by every nested block and include: loop variables
    /// and bindings made by included templates stay visible after they finish.
    #[default]
    Dynamic,
    /// A loop variable's previous binding (or its absence) is restored when the
    /// loop ends, and included templates render into a copy of the context.
    Isolated,
}

/// Mutable name→value environment visible to every fragment of one render pass.
///
/// A fresh `Context` is built for each call to a render entry point from the
/// caller's context followed by the caller's overrides (which win on conflict).
/// Assignment fragments, `set(...)` and `for` loops bind names into it in place,
/// and under [`Scoping::Dynamic`] the same instance is
/// threaded through nested blocks and `include(...)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value bound to `name`.
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind or rebind `name`, returning the previous value if any.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    pub fn remove_var(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Copy every binding of `other` into `self`, overwriting on conflict.
    pub fn merge(&mut self, other: &Context) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Build a context from a JSON object; any other JSON value yields `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl From<HashMap<String, Value>> for Context {
    fn from(vars: HashMap<String, Value>) -> Self {
        Self { vars }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Context {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.vars.insert(k.into(), v.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Context;
    use serde_json::json;

    #[test]
    fn test_context_set_and_get_var() {
        let mut ctx = Context::new();

        // initially absent
        assert_eq!(ctx.get_var("name"), None);

        assert_eq!(ctx.set_var("name", "bob"), None);
        assert_eq!(ctx.get_var("name"), Some(&json!("bob")));

        assert_eq!(ctx.set_var("name", 3), Some(json!("bob")));
        assert_eq!(ctx.remove_var("name"), Some(json!(3)));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_merge_overrides_win() {
        let mut base: Context = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        let overrides: Context = [("b", json!("over"))].into_iter().collect();
        base.merge(&overrides);

        assert_eq!(base.get_var("a"), Some(&json!(1)));
        assert_eq!(base.get_var("b"), Some(&json!("over")));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_from_json_requires_object() {
        let ctx = Context::from_json(json!({"x": [1, 2]})).unwrap();
        assert!(ctx.contains("x"));
        assert!(Context::from_json(json!([1])).is_none());
    }
}
