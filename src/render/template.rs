// src/render/template.rs

//! Minimal text templating: `{{ name }}` substitutions with a chain of
//! named filters, e.g. `{{ files | replicate_option("--input") }}`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::errors::{Result, WoomError};

/// Variables visible to a template.
pub type Context = BTreeMap<String, String>;

/// A filter receives the current value and its call arguments.
pub type FilterFn = Arc<dyn Fn(&str, &[String]) -> Result<String> + Send + Sync>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: checked by the tests of this module.
    Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap()
});

static FILTER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: checked by the tests of this module.
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?$").unwrap()
});

/// Named text transforms available to templates.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<String, FilterFn>,
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.filters.keys()).finish()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            filters: BTreeMap::new(),
        };
        registry.register("upper", |v, _| Ok(v.to_uppercase()));
        registry.register("lower", |v, _| Ok(v.to_lowercase()));
        registry.register("basename", |v, _| {
            Ok(Path::new(v)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default())
        });
        registry.register("dirname", |v, _| {
            Ok(Path::new(v)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default())
        });
        registry.register("replicate_option", replicate_option);
        registry
    }
}

/// `{{ values | replicate_option("--opt") }}` -> `--opt=a --opt=b`.
///
/// Values are split on whitespace and commas. An optional second argument
/// overrides the `{opt_name}={value}` format.
fn replicate_option(value: &str, args: &[String]) -> Result<String> {
    let opt_name = args.first().ok_or_else(|| {
        WoomError::TemplateRender("replicate_option needs an option name".to_string())
    })?;
    let format = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("{opt_name}={value}");
    Ok(value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|v| !v.is_empty())
        .map(|v| format.replace("{opt_name}", opt_name).replace("{value}", v))
        .collect::<Vec<_>>()
        .join(" "))
}

impl FilterRegistry {
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&str, &[String]) -> Result<String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|s| s.as_str())
    }
}

/// Pure `template + context -> text` renderer.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    filters: FilterRegistry,
}

impl TemplateRenderer {
    pub fn new(filters: FilterRegistry) -> Self {
        Self { filters }
    }

    pub fn filters_mut(&mut self) -> &mut FilterRegistry {
        &mut self.filters
    }

    pub fn render(&self, template: &str, ctx: &Context) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&self.eval(expr.as_str(), ctx)?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn eval(&self, expr: &str, ctx: &Context) -> Result<String> {
        let mut parts = split_unquoted(expr, '|').into_iter();
        let name = parts.next().unwrap_or_default();
        let name = name.trim();
        let mut value = ctx
            .get(name)
            .cloned()
            .ok_or_else(|| WoomError::TemplateRender(format!("undefined variable '{name}'")))?;

        for call in parts {
            let call = call.trim();
            let caps = FILTER_CALL.captures(call).ok_or_else(|| {
                WoomError::TemplateRender(format!("malformed filter '{call}'"))
            })?;
            let filter_name = caps.get(1).map_or("", |m| m.as_str());
            let args = caps
                .get(2)
                .map(|m| parse_args(m.as_str()))
                .unwrap_or_default();
            let filter = self.filters.get(filter_name).ok_or_else(|| {
                WoomError::TemplateRender(format!("unknown filter '{filter_name}'"))
            })?;
            value = filter(&value, &args)?;
        }
        Ok(value)
    }
}

/// Split on `sep`, ignoring separators inside single or double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, c) if c == sep => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_args(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    split_unquoted(s, ',')
        .into_iter()
        .map(|a| {
            let a = a.trim();
            let unquoted = a
                .strip_prefix('"')
                .and_then(|x| x.strip_suffix('"'))
                .or_else(|| a.strip_prefix('\'').and_then(|x| x.strip_suffix('\'')));
            unquoted.unwrap_or(a).to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_variables() {
        let r = TemplateRenderer::default();
        let out = r
            .render(
                "run {{ task_name }} in {{cycle_token}}",
                &ctx(&[("task_name", "model"), ("cycle_token", "c1")]),
            )
            .unwrap();
        assert_eq!(out, "run model in c1");
    }

    #[test]
    fn missing_variable_is_render_error() {
        let r = TemplateRenderer::default();
        let err = r.render("{{ nope }}", &Context::new()).unwrap_err();
        assert!(matches!(err, WoomError::TemplateRender(msg) if msg.contains("nope")));
    }

    #[test]
    fn filters_chain() {
        let r = TemplateRenderer::default();
        let c = ctx(&[("path", "/data/in/file.nc"), ("files", "a.nc b.nc")]);
        assert_eq!(r.render("{{ path | basename | upper }}", &c).unwrap(), "FILE.NC");
        assert_eq!(r.render("{{ path | dirname }}", &c).unwrap(), "/data/in");
        assert_eq!(
            r.render("{{ files | replicate_option(\"--in\") }}", &c).unwrap(),
            "--in=a.nc --in=b.nc"
        );
        assert_eq!(
            r.render("{{ files | replicate_option('-i', '{opt_name} {value}') }}", &c)
                .unwrap(),
            "-i a.nc -i b.nc"
        );
    }

    #[test]
    fn custom_filters_can_be_registered() {
        let mut r = TemplateRenderer::default();
        r.filters_mut()
            .register("twice", |v, _| Ok(format!("{v}{v}")));
        assert_eq!(r.render("{{ x | twice }}", &ctx(&[("x", "ab")])).unwrap(), "abab");

        let err = r.render("{{ x | nope }}", &ctx(&[("x", "ab")])).unwrap_err();
        assert!(matches!(err, WoomError::TemplateRender(_)));
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let r = TemplateRenderer::default();
        let s = "echo ${HOME} $((1 + 2))";
        assert_eq!(r.render(s, &Context::new()).unwrap(), s);
    }
}
