use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Object-safe trait for a host function callable from template expressions.
///
/// A blanket implementation exists for any `Fn(&[Value]) -> anyhow::Result<Value>`
/// closure that is `Send + Sync`, so most hosts never implement it by hand.
pub trait TemplateFunction: Send + Sync {
    /// Call the function with already evaluated arguments.
    fn call(&self, args: &[Value]) -> anyhow::Result<Value>;
}

impl<F> TemplateFunction for F
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self(args)
    }
}

/// Registry of the host functions a template may call, besides the intrinsics.
///
/// Calls are resolved by name at evaluation time; a call to a name that is neither
/// an intrinsic nor registered here is reported like any other undefined name.
#[derive(Clone, Default)]
pub struct Functions {
    map: HashMap<String, Arc<dyn TemplateFunction>>,
}

impl Functions {
    /// An empty registry: templates can call the intrinsics only.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default registry: `len`, `str`, `int`, `range`, `join`, `upper`,
    /// `lower`, `trim` and `env`.
    pub fn standard() -> Self {
        let mut functions = Self::new();
        for (name, function) in crate::builtin::standard_functions() {
            functions.map.insert(name.to_string(), function);
        }
        functions
    }

    /// Register `function` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, function: impl TemplateFunction + 'static) {
        self.map.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TemplateFunction>> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.map.keys().collect();
        names.sort();
        f.debug_struct("Functions").field("names", &names).finish()
    }
}
