//! Script templates: plain text with embedded `{{ ... }}` fragments.
//!
//! A fragment is a comment (`{{# ... }}`), an assignment (`{{ name = expr }}`), a
//! block keyword (`if expr`, `else`, `for name in expr`, `end`) or a bare expression
//! whose value is interpolated. Expressions are written in a small language over
//! JSON values and may call the intrinsics `set`, `include`, `expect` and `shell`
//! as well as any host function registered in [`Functions`].
//!
//! The main entry point is [`Template`], which tokenizes its source once and can be
//! rendered repeatedly. [`render_template`] and [`render_template_file`] are
//! one-shot shortcuts.
//!
//! ```
//! use script_templates::{render_template, Context};
//!
//! let context: Context = [("who", "world")].into_iter().collect();
//! let text = "{{ if who }}Hello, {{ who }}!{{ else }}Nobody.{{ end }}";
//! assert_eq!(render_template(text, Some(&context), None, None).unwrap(), "Hello, world!");
//!
//! let mut undefined = Vec::new();
//! render_template("{{ missing }}", None, None, Some(&mut undefined)).unwrap();
//! assert_eq!(undefined, vec!["missing".to_string()]);
//! ```

mod builtin;
pub mod env;
pub mod error;
mod expr_lexer;
mod external;
pub mod function;
mod interpreter;
pub mod lexer;
mod parser;
mod template;
mod value;

pub use env::{Context, Scoping};
pub use error::{Result, TemplateError};
pub use function::{Functions, TemplateFunction};
pub use template::{FileLocator, RenderOptions, Template, render_template, render_template_file};
