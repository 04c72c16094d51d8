//! Vendor prefixing with lightningcss.

use std::collections::BTreeMap;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::Deserialize;

/// Browser targets as `name = "major[.minor]"` pairs.
///
/// Recognised names: android, chrome, edge, firefox, ie, ios_saf, opera,
/// safari, samsung.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct BrowserTargets(pub BTreeMap<String, String>);

impl Default for BrowserTargets {
    fn default() -> Self {
        let defaults = [
            ("chrome", "80"),
            ("edge", "80"),
            ("firefox", "78"),
            ("safari", "12"),
            ("ios_saf", "12"),
            ("samsung", "12"),
        ];
        Self(
            defaults
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl BrowserTargets {
    /// Convert to lightningcss browser versions.
    pub fn to_browsers(&self) -> Result<Browsers, String> {
        let mut browsers = Browsers::default();
        for (name, version) in &self.0 {
            let encoded = Some(encode_version(version)?);
            match name.as_str() {
                "android" => browsers.android = encoded,
                "chrome" => browsers.chrome = encoded,
                "edge" => browsers.edge = encoded,
                "firefox" => browsers.firefox = encoded,
                "ie" => browsers.ie = encoded,
                "ios_saf" => browsers.ios_saf = encoded,
                "opera" => browsers.opera = encoded,
                "safari" => browsers.safari = encoded,
                "samsung" => browsers.samsung = encoded,
                other => return Err(format!("unknown browser '{}'", other)),
            }
        }
        Ok(browsers)
    }
}

/// `"13.1"` → `(13 << 16) | (1 << 8)`, the encoding lightningcss expects.
///
/// Each component must fit in one byte.
fn encode_version(version: &str) -> Result<u32, String> {
    let mut parts = version.trim().split('.');
    let parse = |part: Option<&str>| -> Result<u32, String> {
        match part {
            None => Ok(0),
            Some(p) => p
                .parse::<u8>()
                .map(u32::from)
                .map_err(|_| format!("invalid browser version '{}'", version)),
        }
    };
    let major = parse(parts.next())?;
    let minor = parse(parts.next())?;
    let patch = parse(parts.next())?;
    if parts.next().is_some() {
        return Err(format!("invalid browser version '{}'", version));
    }
    Ok(major << 16 | minor << 8 | patch)
}

/// Adds vendor prefixes required by the configured browsers.
#[derive(Debug, Clone)]
pub struct Prefixer {
    browsers: Browsers,
}

impl Prefixer {
    pub fn new(browsers: Browsers) -> Self {
        Self { browsers }
    }

    /// Build from configured targets.
    pub fn from_targets(targets: &BrowserTargets) -> Result<Self, String> {
        Ok(Self::new(targets.to_browsers()?))
    }

    /// Parse, prefix and print `css`. Output is pretty-printed.
    ///
    /// Prefixing runs through the lightningcss minify pass, which also drops
    /// empty rules and merges adjacent rules with identical selectors.
    pub fn prefix(&self, filename: &str, css: &str) -> Result<String, String> {
        let targets = Targets::from(self.browsers);

        let mut stylesheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: filename.to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| format!("CSS parse error: {}", e))?;

        stylesheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| format!("CSS transform error: {}", e))?;

        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: false,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| format!("CSS print error: {}", e))?;

        Ok(printed.code)
    }
}
