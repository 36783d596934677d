//! Theme extraction from CSS custom-property blocks.
//!
//! Themes are written as `.theme-<name> { --property: value; ... }`. Color
//! values are HSL, either as bare shadcn-style triples (`210 50% 50%`) or as
//! `hsl()`/`hsla()` functions.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub type Properties = BTreeMap<String, String>;

static THEME_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.theme-([A-Za-z0-9_-]+)\s*\{([^}]*)\}").expect("valid theme block regex")
});

static ROOT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":root\s*\{([^}]*)\}").expect("valid root block regex"));

static PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--([A-Za-z0-9_-]+)\s*:\s*([^;]+);").expect("valid property regex")
});

static HSL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^
        (?:
            hsla?\(\s* (?P<fh>-?\d+(?:\.\d+)?)(?:deg)? (?:\s*,\s*|\s+)
            (?P<fs>\d+(?:\.\d+)?)% (?:\s*,\s*|\s+)
            (?P<fl>\d+(?:\.\d+)?)% (?:\s*[,/]\s*[\d.]+%?)? \s*\)
        |
            (?P<h>-?\d+(?:\.\d+)?)(?:deg)? \s+
            (?P<s>\d+(?:\.\d+)?)% \s+
            (?P<l>\d+(?:\.\d+)?)% (?:\s*/\s*[\d.]+%?)?
        )$",
    )
    .expect("valid hsl regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

impl Hsl {
    pub fn to_hex(self) -> String {
        hsl_to_hex(self.h, self.s, self.l)
    }

    pub fn to_rgb(self) -> (u8, u8, u8) {
        hsl_to_rgb(self.h, self.s, self.l)
    }
}

/// Extracts every `.theme-<name>` block. Repeated blocks for the same theme
/// are merged; later declarations win.
pub fn extract_themes(css: &str) -> BTreeMap<String, Properties> {
    let css = COMMENT.replace_all(css, "");
    let mut themes: BTreeMap<String, Properties> = BTreeMap::new();
    for caps in THEME_BLOCK.captures_iter(&css) {
        let name = caps[1].to_string();
        themes.entry(name).or_default().extend(extract_properties(&caps[2]));
    }
    themes
}

/// Properties declared in `:root` blocks, if there are any.
pub fn extract_root(css: &str) -> Option<Properties> {
    let css = COMMENT.replace_all(css, "");
    let mut found = false;
    let mut props = Properties::new();
    for caps in ROOT_BLOCK.captures_iter(&css) {
        found = true;
        props.extend(extract_properties(&caps[1]));
    }
    found.then_some(props)
}

pub fn extract_properties(block: &str) -> Properties {
    PROPERTY
        .captures_iter(block)
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
        .collect()
}

pub fn parse_hsl(value: &str) -> Option<Hsl> {
    let caps = HSL.captures(value.trim())?;
    let part = |functional: &str, bare: &str| -> Option<f64> {
        caps.name(functional).or_else(|| caps.name(bare))?.as_str().parse().ok()
    };
    Some(Hsl {
        h: part("fh", "h")?,
        s: part("fs", "s")?,
        l: part("fl", "l")?,
    })
}

/// Hue in degrees, saturation and lightness in percent.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0);
    let s = s.clamp(0.0, 100.0) / 100.0;
    let l = l.clamp(0.0, 100.0) / 100.0;

    let a = s * l.min(1.0 - l);
    let channel = |n: f64| {
        let k = (n + h / 30.0) % 12.0;
        let v = l - a * (k - 3.0).min(9.0 - k).min(1.0).max(-1.0);
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };
    (channel(0.0), channel(8.0), channel(4.0))
}

pub fn hsl_to_hex(h: f64, s: f64, l: f64) -> String {
    let (r, g, b) = hsl_to_rgb(h, s, l);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}
