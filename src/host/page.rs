//! Page-rendering application hosted by the HTTP adapter.
//!
//! Each unit is a TOML page:
//!
//! ```toml
//! title = "Home"
//! body = "Welcome."
//! include = ["site.news", "builtin.footer"]
//! ```
//!
//! Starting a generation renders the target page and its includes,
//! depth-first, into one HTML document.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::coordinator::Lifecycle;
use crate::loader::{Definition, ModuleLoader, StaticResolver, UnitDefiner};
use crate::{AppError, Result};

const BUILTIN_FOOTER: &str = r#"
title = "Footer"
body = "Served live by code-reloader."
"#;

/// One page unit.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// Heading text.
    pub title: String,
    /// Paragraph text.
    #[serde(default)]
    pub body: String,
    /// Units rendered after this page's own content, in order.
    #[serde(default)]
    pub include: Vec<String>,
}

/// Defines units as [`Page`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageDefiner;

impl UnitDefiner for PageDefiner {
    fn define(&self, _name: &str, bytes: &[u8]) -> std::result::Result<Definition, String> {
        let text = std::str::from_utf8(bytes).map_err(|err| format!("not valid UTF-8: {err}"))?;
        let page: Page = toml::from_str(text).map_err(|err| err.to_string())?;
        Ok(Arc::new(page))
    }
}

/// Packaged pages that are never reloaded.
///
/// # Errors
///
/// Returns `AppError::UnitInvalid` if a packaged page fails to parse.
pub fn builtin_resolver() -> Result<StaticResolver> {
    StaticResolver::from_sources(&PageDefiner, [("builtin.footer", BUILTIN_FOOTER.as_bytes())])
}

/// Output of one generation of the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSite {
    /// Generation that rendered this output.
    pub generation: u64,
    /// Complete HTML document.
    pub html: String,
    /// Units that went into the document, in render order.
    pub units: Vec<String>,
}

/// [`Lifecycle`] that renders `target` on start.
#[derive(Debug, Clone)]
pub struct SiteLifecycle {
    target: String,
}

impl SiteLifecycle {
    /// Render `target` for every generation.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Target unit name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Lifecycle for SiteLifecycle {
    type Instance = RenderedSite;

    fn start(
        &self,
        loader: Arc<ModuleLoader>,
    ) -> Pin<Box<dyn Future<Output = Result<RenderedSite>> + Send + '_>> {
        Box::pin(async move { render_site(&loader, &self.target) })
    }

    fn stop<'a>(
        &'a self,
        instance: &'a RenderedSite,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            info!(generation = instance.generation, "site generation stopped");
        })
    }
}

/// Render `target` and everything it includes through `loader`.
///
/// # Errors
///
/// Propagates load failures; include cycles and non-page units are
/// `AppError::UnitInvalid`.
pub fn render_site(loader: &ModuleLoader, target: &str) -> Result<RenderedSite> {
    let mut body = String::new();
    let mut trail = Vec::new();
    let mut units = Vec::new();
    render_page(loader, target, &mut trail, &mut body, &mut units)?;

    let html = format!(
        "<!doctype html>\n<html>\n<body data-generation=\"{}\">\n{body}</body>\n</html>\n",
        loader.generation()
    );
    Ok(RenderedSite {
        generation: loader.generation(),
        html,
        units,
    })
}

fn render_page(
    loader: &ModuleLoader,
    name: &str,
    trail: &mut Vec<String>,
    out: &mut String,
    units: &mut Vec<String>,
) -> Result<()> {
    if trail.iter().any(|seen| seen == name) {
        return Err(AppError::UnitInvalid(format!(
            "include cycle: {} -> {name}",
            trail.join(" -> ")
        )));
    }

    let unit = loader.load(name)?;
    let page = unit
        .downcast::<Page>()
        .ok_or_else(|| AppError::UnitInvalid(format!("{name}: not a page")))?;

    trail.push(name.to_owned());
    if !units.iter().any(|seen| seen == name) {
        units.push(name.to_owned());
    }

    out.push_str(&format!(
        "<section data-unit=\"{}\">\n<h1>{}</h1>\n<p>{}</p>\n",
        escape_html(name),
        escape_html(&page.title),
        escape_html(&page.body)
    ));
    for include in &page.include {
        render_page(loader, include, trail, out, units)?;
    }
    out.push_str("</section>\n");

    trail.pop();
    Ok(())
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
