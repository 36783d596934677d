//! Figma design-token export.
//!
//! Colors come from the theme CSS; spacing, typography, radii, component
//! variants and the cosmic effect metadata are fixed design-system values.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::theme::{self, Properties};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColorToken {
    pub value: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub hsl: String,
    pub description: String,
}

pub type ColorSet = BTreeMap<String, ColorToken>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub themes: usize,
    pub colors: usize,
}

/// Color tokens for every HSL-valued property; other properties are skipped.
pub fn color_tokens(props: &Properties, scope: &str) -> ColorSet {
    props
        .iter()
        .filter_map(|(name, value)| {
            let hsl = theme::parse_hsl(value)?;
            Some((
                name.clone(),
                ColorToken {
                    value: hsl.to_hex(),
                    kind: "color",
                    hsl: value.clone(),
                    description: format!("{} color ({})", humanize(name), scope),
                },
            ))
        })
        .collect()
}

fn humanize(property: &str) -> String {
    let mut words: Vec<String> = property
        .split('-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(first) = words.first_mut() {
        let mut chars = first.chars();
        if let Some(c) = chars.next() {
            *first = c.to_uppercase().chain(chars).collect();
        }
    }
    words.join(" ")
}

/// Builds the full token document from theme CSS.
pub fn build_tokens(css: &str, source: &str) -> Result<Value> {
    let themes = theme::extract_themes(css);
    let root = theme::extract_root(css);

    if themes.is_empty() && root.is_none() {
        bail!("no theme blocks (.theme-<name> {{ ... }}) or :root block found in {}", source);
    }

    let theme_colors: BTreeMap<String, ColorSet> = themes
        .iter()
        .map(|(name, props)| (name.clone(), color_tokens(props, &format!("{} theme", name))))
        .collect();

    let base_colors = match &root {
        Some(props) => color_tokens(props, "base"),
        None => theme_colors.values().next().cloned().unwrap_or_default(),
    };

    for (name, colors) in &theme_colors {
        if colors.is_empty() {
            warn!(theme = %name, "theme declares no HSL colors");
        }
        debug!(theme = %name, colors = colors.len(), "extracted theme");
    }

    Ok(json!({
        "colors": base_colors,
        "themes": theme_colors,
        "cosmic": cosmic_tokens(),
        "spacing": spacing_tokens(),
        "typography": typography_tokens(),
        "borderRadius": border_radius_tokens(),
        "components": component_tokens(),
        "_metadata": {
            "generatedAt": Utc::now().to_rfc3339(),
            "source": source,
            "generator": concat!("jobsearch ", env!("CARGO_PKG_VERSION")),
            "version": "1.0.0",
            "themeCount": theme_colors.len(),
            "themes": theme_colors.keys().collect::<Vec<_>>(),
        },
    }))
}

/// Reads `input`, writes the token document to `output`. The document is
/// written to a sibling temp file first so a failed run leaves no partial
/// output behind.
pub fn export_tokens(input: &Path, output: &Path) -> Result<ExportSummary> {
    let css = fs::read_to_string(input)
        .with_context(|| format!("Failed to read theme CSS: {}", input.display()))?;

    let document = build_tokens(&css, &input.display().to_string())?;
    let rendered = serde_json::to_string_pretty(&document)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let tmp = output.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp, rendered + "\n")
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, output) {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %cleanup, "could not remove temp file");
        }
        return Err(e).with_context(|| format!("Failed to move tokens into place at {}", output.display()));
    }

    let summary = ExportSummary {
        themes: document["themes"].as_object().map_or(0, |t| t.len()),
        colors: document["themes"]
            .as_object()
            .map_or(0, |t| t.values().filter_map(Value::as_object).map(|c| c.len()).sum()),
    };
    info!(
        input = %input.display(),
        output = %output.display(),
        themes = summary.themes,
        colors = summary.colors,
        "exported design tokens"
    );
    Ok(summary)
}

fn cosmic_tokens() -> Value {
    json!({
        "animations": {
            "twinkle": { "duration": "3s", "easing": "ease-in-out", "iteration": "infinite" },
            "float": { "duration": "6s", "easing": "ease-in-out", "iteration": "infinite" },
            "pulse-glow": { "duration": "2s", "easing": "cubic-bezier(0.4, 0, 0.6, 1)", "iteration": "infinite" },
            "shooting-star": { "duration": "1.5s", "easing": "linear", "iteration": "1" }
        },
        "effects": {
            "glass": { "backdropBlur": "12px", "backgroundOpacity": 0.1, "borderOpacity": 0.2 },
            "glow": { "blur": "20px", "spread": "4px", "opacity": 0.6 },
            "nebula": { "gradient": "radial-gradient(ellipse at top, hsl(270 80% 30% / 0.4), transparent 70%)" },
            "starfield": { "density": 200, "minSize": "1px", "maxSize": "3px" }
        }
    })
}

fn spacing_tokens() -> Value {
    let scale = [("xs", 4), ("sm", 8), ("md", 16), ("lg", 24), ("xl", 32), ("2xl", 48), ("3xl", 64)];
    Value::Object(
        scale
            .into_iter()
            .map(|(name, px)| (name.to_string(), json!({ "value": format!("{}px", px), "type": "spacing" })))
            .collect(),
    )
}

fn typography_tokens() -> Value {
    json!({
        "fontFamily": {
            "sans": { "value": "Inter, system-ui, sans-serif", "type": "fontFamilies" },
            "mono": { "value": "JetBrains Mono, ui-monospace, monospace", "type": "fontFamilies" }
        },
        "fontSize": {
            "xs": { "value": "12px", "type": "fontSizes" },
            "sm": { "value": "14px", "type": "fontSizes" },
            "base": { "value": "16px", "type": "fontSizes" },
            "lg": { "value": "18px", "type": "fontSizes" },
            "xl": { "value": "20px", "type": "fontSizes" },
            "2xl": { "value": "24px", "type": "fontSizes" },
            "3xl": { "value": "30px", "type": "fontSizes" },
            "4xl": { "value": "36px", "type": "fontSizes" }
        },
        "fontWeight": {
            "normal": { "value": "400", "type": "fontWeights" },
            "medium": { "value": "500", "type": "fontWeights" },
            "semibold": { "value": "600", "type": "fontWeights" },
            "bold": { "value": "700", "type": "fontWeights" }
        },
        "lineHeight": {
            "tight": { "value": "1.25", "type": "lineHeights" },
            "normal": { "value": "1.5", "type": "lineHeights" },
            "relaxed": { "value": "1.75", "type": "lineHeights" }
        }
    })
}

fn border_radius_tokens() -> Value {
    json!({
        "none": { "value": "0px", "type": "borderRadius" },
        "sm": { "value": "4px", "type": "borderRadius" },
        "md": { "value": "6px", "type": "borderRadius" },
        "lg": { "value": "8px", "type": "borderRadius" },
        "xl": { "value": "12px", "type": "borderRadius" },
        "full": { "value": "9999px", "type": "borderRadius" }
    })
}

fn component_tokens() -> Value {
    json!({
        "button": {
            "variants": ["default", "destructive", "outline", "secondary", "ghost", "link"],
            "sizes": ["sm", "default", "lg", "icon"]
        },
        "badge": {
            "variants": ["default", "secondary", "destructive", "outline"]
        },
        "card": {
            "parts": ["header", "title", "description", "content", "footer"]
        },
        "input": {
            "states": ["default", "focus", "disabled", "invalid"]
        },
        "jobCard": {
            "parts": ["title", "company", "location", "salary", "tags", "actions"],
            "states": ["default", "saved", "applied"]
        }
    })
}
