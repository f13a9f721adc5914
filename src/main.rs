use anyhow::{Context as _, anyhow, bail};
use argh::FromArgs;
use log::info;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use script_templates::{Context, FileLocator, RenderOptions, Scoping, Template};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Render a script template.
#[derive(FromArgs)]
struct Args {
    /// template file to render
    #[argh(positional)]
    template: PathBuf,

    /// write the result here instead of stdout
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// JSON file holding an object of initial bindings
    #[argh(option, short = 'c')]
    context: Option<PathBuf>,

    /// bind NAME to VALUE (parsed as JSON, else taken as a string); repeatable
    #[argh(option, short = 's')]
    set: Vec<String>,

    /// directory searched first for included templates
    #[argh(option, short = 'I')]
    include_dir: Option<PathBuf>,

    /// prompt for every undefined name and re-render until none are left
    #[argh(switch, short = 'i')]
    interactive: bool,

    /// maximum include nesting
    #[argh(option, default = "RenderOptions::default().max_include_depth")]
    max_include_depth: usize,

    /// keep loop variables and include bindings out of the enclosing scope
    #[argh(switch)]
    isolated: bool,

    /// log progress
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let text = fs::read_to_string(&args.template)
        .with_context(|| format!("failed to read {}", args.template.display()))?;

    let mut context = match &args.context {
        Some(path) => load_context(path)?,
        None => Context::new(),
    };
    for binding in &args.set {
        let (name, value) = parse_binding(binding)?;
        context.set_var(name, value);
    }

    let options = RenderOptions::default()
        .with_max_include_depth(args.max_include_depth)
        .with_scoping(if args.isolated {
            Scoping::Isolated
        } else {
            Scoping::Dynamic
        });
    let template = Template::new(&text)
        .with_shared_file_locator(Some(locator(args.include_dir.clone(), &args.template)))
        .with_options(options);

    let rendered = if args.interactive {
        fill_in(&template, &mut context)?
    } else {
        template.render(Some(&context), None)?
    };

    match &args.output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn load_context(path: &Path) -> anyhow::Result<Context> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Context::from_json(json).ok_or_else(|| anyhow!("{} must hold a JSON object", path.display()))
}

/// Split `NAME=VALUE`; VALUE is JSON when it parses as such, a plain string otherwise.
fn parse_binding(binding: &str) -> anyhow::Result<(String, Value)> {
    let Some((name, raw)) = binding.split_once('=') else {
        bail!("expected NAME=VALUE, got `{binding}`");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("empty name in `{binding}`");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Resolve include paths against `include_dir`, then the template's own directory.
fn locator(include_dir: Option<PathBuf>, template: &Path) -> FileLocator {
    let template_dir = template.parent().map(Path::to_path_buf);
    Arc::new(move |name: &str| {
        let requested = Path::new(name);
        if requested.is_absolute() {
            return Some(requested.to_path_buf());
        }
        include_dir
            .iter()
            .chain(template_dir.iter())
            .map(|dir| dir.join(requested))
            .find(|candidate| candidate.is_file())
            .or_else(|| Some(requested.to_path_buf()))
    })
}

/// Fail when a name that was already given a value is reported undefined again.
///
/// That happens for calls to unknown functions: binding a variable of the same
/// name never satisfies a call.
fn ensure_progress(undefined: &[String], answered: &HashSet<String>) -> anyhow::Result<()> {
    match undefined.iter().find(|name| answered.contains(*name)) {
        Some(name) => bail!(
            "`{name}` is still undefined after being given a value; is it called as a function?"
        ),
        None => Ok(()),
    }
}

/// Render, ask for every undefined name, repeat until nothing is missing.
fn fill_in(template: &Template, context: &mut Context) -> anyhow::Result<String> {
    let mut rl = DefaultEditor::new()?;
    let mut answered = HashSet::new();

    loop {
        let mut undefined = Vec::new();
        let rendered = template.render(Some(context), Some(&mut undefined))?;
        if undefined.is_empty() {
            return Ok(rendered);
        }
        ensure_progress(&undefined, &answered)?;
        info!("{} undefined name(s): {}", undefined.len(), undefined.join(", "));

        for name in undefined {
            match rl.readline(&format!("{name} = ")) {
                Ok(line) => {
                    rl.add_history_entry(line.as_str())?;
                    context.set_var(name.clone(), line);
                    answered.insert(name);
                }
                Err(ReadlineError::Interrupted) => bail!("interrupted"),
                Err(ReadlineError::Eof) => bail!("input closed before `{name}` was given"),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_binding_prefers_json() {
        assert_eq!(parse_binding("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_binding("xs=[1, 2]").unwrap(),
            ("xs".to_string(), json!([1, 2]))
        );
        assert_eq!(
            parse_binding("who=bob").unwrap(),
            ("who".to_string(), json!("bob"))
        );
        assert_eq!(
            parse_binding("eq=a=b").unwrap(),
            ("eq".to_string(), json!("a=b"))
        );
        assert_eq!(parse_binding("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_binding("novalue").is_err());
        assert!(parse_binding("=1").is_err());
    }

    #[test]
    fn test_locator_search_order() -> anyhow::Result<()> {
        let includes = tempfile::tempdir()?;
        let templates = tempfile::tempdir()?;
        fs::write(includes.path().join("shared.txt"), "")?;
        fs::write(templates.path().join("shared.txt"), "")?;
        fs::write(templates.path().join("local.txt"), "")?;

        let locate = locator(
            Some(includes.path().to_path_buf()),
            &templates.path().join("main.tpl"),
        );
        assert_eq!(locate("shared.txt"), Some(includes.path().join("shared.txt")));
        assert_eq!(locate("local.txt"), Some(templates.path().join("local.txt")));
        assert_eq!(locate("absent.txt"), Some(PathBuf::from("absent.txt")));
        Ok(())
    }

    #[test]
    fn test_unknown_function_stops_fill_in() -> anyhow::Result<()> {
        let template = Template::new("{{ who }} {{ frobnicate(who) }}");
        let mut context = Context::new();
        let mut answered = HashSet::new();

        let mut undefined = Vec::new();
        template.render(Some(&context), Some(&mut undefined))?;
        assert_eq!(undefined, vec!["who", "frobnicate"]);
        ensure_progress(&undefined, &answered)?;

        for name in undefined {
            context.set_var(name.clone(), "x");
            answered.insert(name);
        }
        let mut undefined = Vec::new();
        template.render(Some(&context), Some(&mut undefined))?;
        assert_eq!(undefined, vec!["frobnicate"]);
        assert!(ensure_progress(&undefined, &answered).is_err());
        Ok(())
    }

    #[test]
    fn test_load_context_requires_object() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        fs::write(&good, r#"{"name": "bob", "n": 2}"#)?;
        fs::write(&bad, "[1, 2]")?;

        let context = load_context(&good)?;
        assert_eq!(context.get_var("name"), Some(&json!("bob")));
        assert!(load_context(&bad).is_err());
        Ok(())
    }
}
