use anyhow::{anyhow, Result};
use kuchiki::parse_html;
use kuchiki::traits::*;
use tracing::debug;

use super::script::{ScriptDescriptor, ScriptExecution, ScriptKind, ScriptSource};

/// Non-script subresources a page load requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAsset {
    pub kind: AssetKind,
    pub href: String,
}

/// Stylesheets and images in document order.
pub fn collect_assets(html: &str) -> Result<Vec<PageAsset>> {
    let parsed = parse_html().one(html);
    let selector = parsed
        .select("link[href], img[src]")
        .map_err(|_| anyhow!("failed to compile selector"))?;

    let mut collected = Vec::new();
    for element in selector {
        let attributes = element.attributes.borrow();
        let (kind, href) = if &*element.name.local == "img" {
            (AssetKind::Image, attributes.get("src"))
        } else {
            let stylesheet = attributes.get("rel").map_or(false, |rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if !stylesheet {
                continue;
            }
            (AssetKind::Stylesheet, attributes.get("href"))
        };
        if let Some(href) = href.map(str::trim).filter(|href| !href.is_empty()) {
            collected.push(PageAsset {
                kind,
                href: href.to_string(),
            });
        }
    }
    Ok(collected)
}

pub fn collect_scripts(html: &str) -> Result<Vec<ScriptDescriptor>> {
    let parsed = parse_html().one(html);
    let mut collected = Vec::new();
    let selector = parsed
        .select("script")
        .map_err(|_| anyhow!("failed to compile selector"))?;

    for (index, script) in selector.enumerate() {
        let attributes = script.attributes.borrow();
        let kind = classify_kind(attributes.get("type"));
        let execution = determine_execution(&attributes, kind);

        if let Some(src) = attributes
            .get("src")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            collected.push(ScriptDescriptor {
                index,
                kind,
                execution,
                source: ScriptSource::External {
                    src: src.to_string(),
                },
            });
            continue;
        }

        drop(attributes);
        let code = script.text_contents();
        if code.trim().is_empty() {
            continue;
        }
        collected.push(ScriptDescriptor::inline(index, code, kind));
    }

    Ok(collected)
}

/// Classic scripts in the order a page load runs them: blocking scripts in
/// document order, then deferred, then async.
pub fn load_order(scripts: Vec<ScriptDescriptor>) -> Vec<ScriptDescriptor> {
    let mut runnable: Vec<ScriptDescriptor> = scripts
        .into_iter()
        .filter(|descriptor| {
            let classic = descriptor.kind == ScriptKind::Classic;
            if !classic {
                debug!(
                    target: "quickjs",
                    script = %descriptor.filename(),
                    kind = ?descriptor.kind,
                    "skipping non-classic script"
                );
            }
            classic
        })
        .collect();
    runnable.sort_by_key(|descriptor| descriptor.execution.phase());
    runnable
}

fn classify_kind(script_type: Option<&str>) -> ScriptKind {
    match script_type {
        Some(value) => {
            let lowered = value.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "" | "text/javascript" | "application/javascript" => ScriptKind::Classic,
                "text/ecmascript" | "application/ecmascript" => ScriptKind::Classic,
                "module" | "text/javascript+module" => ScriptKind::Module,
                _ => ScriptKind::Unknown,
            }
        }
        None => ScriptKind::Classic,
    }
}

fn determine_execution(attributes: &kuchiki::Attributes, kind: ScriptKind) -> ScriptExecution {
    if attributes.get("async").is_some() {
        return ScriptExecution::Async;
    }
    if attributes.get("defer").is_some() {
        return ScriptExecution::Defer;
    }
    match kind {
        ScriptKind::Module => ScriptExecution::Defer,
        _ => ScriptExecution::Blocking,
    }
}
