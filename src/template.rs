use crate::env::{Context, Scoping};
use crate::error::{Result, TemplateError};
use crate::function::Functions;
use crate::interpreter;
use crate::lexer::{self, Token};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maps a path passed to `include(...)` to the file to read.
///
/// Returning `None` fails the include with [`TemplateError::IncludeNotFound`].
/// Without a locator, include paths are used as given.
pub type FileLocator = Arc<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Settings a [`Template`] renders with; included templates inherit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// How deep `include(...)` may nest before the render fails. Zero disables includes.
    pub max_include_depth: usize,
    /// Whether loop variables and include bindings leak into the enclosing scope.
    pub scoping: Scoping,
    /// Directory `shell(...)` commands run in; the process's current one when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_include_depth: 32,
            scoping: Scoping::Dynamic,
            working_dir: None,
        }
    }
}

impl RenderOptions {
    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_scoping(mut self, scoping: Scoping) -> Self {
        self.scoping = scoping;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A parsed, renderable template.
///
/// The source is split into tokens once, at construction. Rendering never mutates
/// the template: every call gets its own cursor and its own [`Context`], so a
/// template can be rendered any number of times, from any number of threads, with
/// identical input giving identical output.
///
/// Example
/// ```
/// use script_templates::{Context, Template};
///
/// let template = Template::new("{{ for x in items }}<{{ x }}>{{ end }}");
/// let context: Context = [("items", serde_json::json!([1, 2]))].into_iter().collect();
/// assert_eq!(template.render(Some(&context), None).unwrap(), "<1><2>");
/// assert_eq!(template.render(Some(&context), None).unwrap(), "<1><2>");
/// ```
#[derive(Clone)]
pub struct Template {
    tokens: Vec<Token>,
    file_locator: Option<FileLocator>,
    functions: Arc<Functions>,
    options: RenderOptions,
}

impl Template {
    /// Tokenize `text` with the standard host functions and default options.
    pub fn new(text: &str) -> Self {
        Self {
            tokens: lexer::split_into_tokens(text),
            file_locator: None,
            functions: Arc::new(Functions::standard()),
            options: RenderOptions::default(),
        }
    }

    /// Resolve `include(...)` paths through `locator`.
    pub fn with_file_locator(
        mut self,
        locator: impl Fn(&str) -> Option<PathBuf> + Send + Sync + 'static,
    ) -> Self {
        self.file_locator = Some(Arc::new(locator));
        self
    }

    /// Like [`Template::with_file_locator`], for an already shared or absent locator.
    pub fn with_shared_file_locator(mut self, locator: Option<FileLocator>) -> Self {
        self.file_locator = locator;
        self
    }

    /// Replace the host functions templates may call.
    pub fn with_functions(mut self, functions: Functions) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }

    pub fn file_locator(&self) -> Option<&FileLocator> {
        self.file_locator.as_ref()
    }

    /// A template for included text, sharing this one's locator, functions and options.
    pub(crate) fn nested(&self, text: &str) -> Template {
        Template {
            tokens: lexer::split_into_tokens(text),
            file_locator: self.file_locator.clone(),
            functions: Arc::clone(&self.functions),
            options: self.options.clone(),
        }
    }

    /// Render against `context`.
    ///
    /// When `undefined_names` is given, names that fail to resolve are appended to
    /// it (once each) and the failing expression evaluates to null instead of
    /// aborting the render. Callers can then ask for the missing values and render
    /// again until the list comes back empty.
    pub fn render(
        &self,
        context: Option<&Context>,
        undefined_names: Option<&mut Vec<String>>,
    ) -> Result<String> {
        self.render_with(context, &Context::new(), undefined_names)
    }

    /// Render against `context` with `overrides` layered on top; overrides win.
    pub fn render_with(
        &self,
        context: Option<&Context>,
        overrides: &Context,
        undefined_names: Option<&mut Vec<String>>,
    ) -> Result<String> {
        let mut global = context.cloned().unwrap_or_default();
        global.merge(overrides);
        interpreter::render_tokens(self, &mut global, undefined_names, 0)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("tokens", &self.tokens)
            .field("file_locator", &self.file_locator.is_some())
            .field("functions", &self.functions)
            .field("options", &self.options)
            .finish()
    }
}

/// Build a [`Template`] from `text` and render it once.
pub fn render_template(
    text: &str,
    context: Option<&Context>,
    file_locator: Option<FileLocator>,
    undefined_names: Option<&mut Vec<String>>,
) -> Result<String> {
    Template::new(text)
        .with_shared_file_locator(file_locator)
        .render(context, undefined_names)
}

/// Render the UTF-8 file `template_file` and overwrite `output_file` with the result.
///
/// Nothing is written when rendering fails.
pub fn render_template_file(
    template_file: impl AsRef<Path>,
    output_file: impl AsRef<Path>,
    context: Option<&Context>,
    undefined_names: Option<&mut Vec<String>>,
    file_locator: Option<FileLocator>,
) -> Result<()> {
    let template_file = template_file.as_ref();
    let output_file = output_file.as_ref();

    let text =
        fs::read_to_string(template_file).map_err(|e| TemplateError::io(template_file, e))?;
    let rendered = render_template(&text, context, file_locator, undefined_names)?;
    fs::write(output_file, rendered).map_err(|e| TemplateError::io(output_file, e))
}
