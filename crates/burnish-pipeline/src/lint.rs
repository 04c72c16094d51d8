//! Stylesheet linting with optional auto-fix.
//!
//! The linter works on plain CSS text: it finds innermost declaration blocks,
//! splits them into declarations and runs a handful of rules over them. Every
//! problem carries a byte offset into the text it was found in.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::diagnostic::{Diagnostic, LineIndex, Severity};
use crate::validate::RuleLevel;

static HEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#([0-9A-Za-z]+)").unwrap());

static ZERO_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s,(/])(-?0(?:\.0+)?)(px|em|rem|ex|ch|vw|vh|vmin|vmax|cm|mm|in|pt|pc|q)\b")
        .unwrap()
});

/// Rule identifiers with their default levels.
pub const RULES: &[(&str, RuleLevel)] = &[
    ("block-no-empty", RuleLevel::ERROR),
    ("color-no-invalid-hex", RuleLevel::ERROR),
    ("declaration-block-no-duplicate-properties", RuleLevel::ERROR),
    ("length-zero-no-unit", RuleLevel::WARN),
    ("color-hex-length", RuleLevel::WARN),
];

/// Linter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LintOptions {
    /// Per-rule level overrides
    pub rules: HashMap<String, RuleLevel>,
}

/// A text replacement fixing a problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// A rule violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub rule: &'static str,
    pub offset: usize,
    pub severity: Severity,
    pub message: String,
    pub fix: Option<Edit>,
}

/// Result of linting one stylesheet.
#[derive(Debug, Clone)]
pub struct LintReport {
    /// Content after fixes (unchanged when not fixing)
    pub content: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Built-in stylesheet linter.
#[derive(Debug, Clone)]
pub struct StyleLinter {
    levels: HashMap<&'static str, RuleLevel>,
}

const MAX_FIX_PASSES: usize = 10;

impl StyleLinter {
    pub fn new(options: &LintOptions) -> Self {
        let mut levels: HashMap<&'static str, RuleLevel> = RULES.iter().copied().collect();
        for (rule, level) in &options.rules {
            match RULES.iter().find(|(id, _)| *id == rule.as_str()) {
                Some(&(id, _)) => {
                    levels.insert(id, *level);
                }
                None => tracing::warn!("Unknown stylesheet lint rule '{}' in config", rule),
            }
        }
        Self { levels }
    }

    pub fn tool(&self) -> &'static str {
        "Stylelint"
    }

    /// Lint `css` and turn problems into diagnostics for `path`.
    ///
    /// With `fix`, fixable problems are repaired and not reported; the report
    /// carries the fixed content.
    pub fn lint(&self, path: &std::path::Path, css: &str, fix: bool) -> LintReport {
        let mut content = css.to_string();

        if fix {
            for _ in 0..MAX_FIX_PASSES {
                let edits: Vec<Edit> = self
                    .problems(&content)
                    .into_iter()
                    .filter_map(|p| p.fix)
                    .collect();
                if edits.is_empty() {
                    break;
                }
                content = apply_edits(&content, edits);
            }
        }

        let index = LineIndex::new(&content);
        let diagnostics = self
            .problems(&content)
            .into_iter()
            .filter(|p| !(fix && p.fix.is_some()))
            .map(|p| {
                let (line, column) = index.position(&content, p.offset);
                Diagnostic::new(self.tool(), path, line, column, p.severity, p.message)
                    .with_rule(p.rule)
            })
            .collect();

        LintReport {
            content,
            diagnostics,
        }
    }

    /// All problems in `css`, in source order.
    pub fn problems(&self, css: &str) -> Vec<Problem> {
        let mut problems = Vec::new();

        for block in blocks(css) {
            let body = &css[block.open + 1..block.close];
            if block.leaf && strip_comments(body).trim().is_empty() {
                self.push(
                    &mut problems,
                    "block-no-empty",
                    block.open,
                    "Unexpected empty block".to_string(),
                    None,
                );
            }
            if !block.leaf {
                continue;
            }

            let declarations = declarations(css, block.open + 1, block.close);
            self.check_duplicates(&declarations, &mut problems);
            for decl in &declarations {
                self.check_value(css, decl, &mut problems);
            }
        }

        problems.sort_by_key(|p| p.offset);
        problems
    }

    fn push(
        &self,
        problems: &mut Vec<Problem>,
        rule: &'static str,
        offset: usize,
        message: String,
        fix: Option<Edit>,
    ) {
        let level = self.levels.get(rule).copied().unwrap_or(RuleLevel::OFF);
        let Some(severity) = Severity::from_level(level.0) else {
            return;
        };
        problems.push(Problem {
            rule,
            offset,
            severity,
            message,
            fix,
        });
    }

    fn check_duplicates(&self, declarations: &[Declaration], problems: &mut Vec<Problem>) {
        let mut seen: HashMap<String, &Declaration> = HashMap::new();
        for decl in declarations {
            let key = if decl.property.starts_with("--") {
                decl.property.clone()
            } else {
                decl.property.to_ascii_lowercase()
            };
            if let Some(previous) = seen.insert(key, decl) {
                self.push(
                    problems,
                    "declaration-block-no-duplicate-properties",
                    decl.start,
                    format!("Unexpected duplicate \"{}\"", decl.property),
                    Some(Edit {
                        start: previous.start,
                        end: previous.end,
                        replacement: String::new(),
                    }),
                );
            }
        }
    }

    fn check_value(&self, css: &str, decl: &Declaration, problems: &mut Vec<Problem>) {
        let value = mask_literals(&css[decl.value_start..decl.value_end]);
        let value = value.as_str();
        let custom = decl.property.starts_with("--");

        for caps in HEX.captures_iter(value) {
            let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let hex = digits.as_str();
            let offset = decl.value_start + whole.start();
            let valid = matches!(hex.len(), 3 | 4 | 6 | 8)
                && hex.chars().all(|c| c.is_ascii_hexdigit());

            if !valid {
                self.push(
                    problems,
                    "color-no-invalid-hex",
                    offset,
                    format!("Unexpected invalid hex color \"#{}\"", hex),
                    None,
                );
            } else if let Some(short) = shorten_hex(hex) {
                self.push(
                    problems,
                    "color-hex-length",
                    offset,
                    format!("Expected \"#{}\" to be \"#{}\"", hex, short),
                    Some(Edit {
                        start: offset + 1,
                        end: offset + 1 + hex.len(),
                        replacement: short,
                    }),
                );
            }
        }

        if custom {
            return;
        }
        for caps in ZERO_LENGTH.captures_iter(value) {
            let (Some(number), Some(unit)) = (caps.get(2), caps.get(3)) else {
                continue;
            };
            let start = decl.value_start + number.start();
            self.push(
                problems,
                "length-zero-no-unit",
                start,
                "Unexpected unit".to_string(),
                Some(Edit {
                    start,
                    end: decl.value_start + unit.end(),
                    replacement: "0".to_string(),
                }),
            );
        }
    }
}

impl Default for StyleLinter {
    fn default() -> Self {
        Self::new(&LintOptions::default())
    }
}

/// `aabbcc` → `abc`, `aabbccdd` → `abcd`.
fn shorten_hex(hex: &str) -> Option<String> {
    if hex.len() != 6 && hex.len() != 8 {
        return None;
    }
    let bytes = hex.as_bytes();
    let pairs: Vec<(u8, u8)> = bytes.chunks(2).map(|c| (c[0], c[1])).collect();
    if pairs.iter().all(|(a, b)| a.eq_ignore_ascii_case(b)) {
        Some(pairs.iter().map(|(a, _)| *a as char).collect())
    } else {
        None
    }
}

/// Apply non-overlapping edits; later overlapping edits are dropped.
fn apply_edits(text: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut kept: Vec<Edit> = Vec::new();
    for edit in edits {
        if kept.last().is_some_and(|k| edit.start < k.end) {
            continue;
        }
        kept.push(edit);
    }

    let mut out = text.to_string();
    for edit in kept.iter().rev() {
        out.replace_range(edit.start..edit.end, &edit.replacement);
    }
    out
}

/// A `{ ... }` block.
#[derive(Debug, Clone, Copy)]
struct Block {
    open: usize,
    close: usize,
    /// No nested blocks inside
    leaf: bool,
}

/// A `property: value;` declaration. `end` includes the semicolon if present.
#[derive(Debug, Clone)]
struct Declaration {
    property: String,
    start: usize,
    end: usize,
    value_start: usize,
    value_end: usize,
}

/// Find every block, skipping comments and strings.
fn blocks(css: &str) -> Vec<Block> {
    let bytes = css.as_bytes();
    let mut stack: Vec<(usize, bool)> = Vec::new();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = css[i + 2..].find("*/").map(|p| i + 2 + p + 2).unwrap_or(bytes.len());
                continue;
            }
            quote @ (b'"' | b'\'') => {
                i = skip_string(bytes, i, quote);
                continue;
            }
            b'{' => {
                if let Some(parent) = stack.last_mut() {
                    parent.1 = false;
                }
                stack.push((i, true));
            }
            b'}' => {
                if let Some((open, leaf)) = stack.pop() {
                    found.push(Block {
                        open,
                        close: i,
                        leaf,
                    });
                }
            }
            _ => {}
        }
        i += 1;
    }

    found.sort_by_key(|b| b.open);
    found
}

fn skip_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Blank out quoted strings and `url(...)` arguments, keeping byte offsets.
fn mask_literals(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut quote: Option<char> = None;
    let mut in_url = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        let masked = if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
                out.push(c);
                continue;
            }
            true
        } else if in_url {
            if c == ')' {
                in_url = false;
                out.push(c);
                continue;
            }
            true
        } else {
            if c == '"' || c == '\'' {
                quote = Some(c);
            } else if c == '(' && value[..i].to_ascii_lowercase().ends_with("url") {
                in_url = true;
            }
            false
        };

        if masked {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_comments(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

/// Split a leaf block body into declarations.
fn declarations(css: &str, start: usize, end: usize) -> Vec<Declaration> {
    let bytes = css.as_bytes();
    let mut result = Vec::new();
    let mut segment_start = start;
    let mut depth = 0usize;
    let mut i = start;

    let mut finish = |seg_start: usize, seg_end: usize, with_semicolon: bool| {
        if let Some(decl) = parse_declaration(css, seg_start, seg_end, with_semicolon) {
            result.push(decl);
        }
    };

    while i < end {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = css[i + 2..end].find("*/").map(|p| i + 2 + p + 2).unwrap_or(end);
                if depth == 0 && css[segment_start..i].trim().is_empty() {
                    segment_start = close;
                }
                i = close;
                continue;
            }
            quote @ (b'"' | b'\'') => {
                i = skip_string(bytes, i, quote).min(end);
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                finish(segment_start, i, true);
                segment_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    finish(segment_start, end, false);

    result
}

fn parse_declaration(
    css: &str,
    start: usize,
    end: usize,
    with_semicolon: bool,
) -> Option<Declaration> {
    let segment = &css[start..end];
    let leading = segment.len() - segment.trim_start().len();
    let colon = segment.find(':')?;
    let property = segment[..colon].trim();
    if property.is_empty() || property.contains(char::is_whitespace) {
        return None;
    }

    let value_raw = &segment[colon + 1..];
    let value_lead = value_raw.len() - value_raw.trim_start().len();
    let value_start = start + colon + 1 + value_lead;
    let value_end = start + colon + 1 + value_raw.trim_end().len();

    Some(Declaration {
        property: property.to_string(),
        start: start + leading,
        end: if with_semicolon { end + 1 } else { start + segment.trim_end().len() },
        value_start,
        value_end: value_end.max(value_start),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn rules(problems: &[Problem]) -> Vec<&'static str> {
        problems.iter().map(|p| p.rule).collect()
    }

    #[test]
    fn clean_stylesheet_has_no_problems() {
        let css = ".a { color: #fa0; margin: 0 auto; }\n@media (min-width: 600px) { .b { padding: 1px; } }\n";
        assert!(StyleLinter::default().problems(css).is_empty());
    }

    #[test]
    fn reports_empty_blocks_and_invalid_hex() {
        let css = ".a {}\n.b { color: #ggg; }\n";
        let problems = StyleLinter::default().problems(css);

        assert_eq!(rules(&problems), vec!["block-no-empty", "color-no-invalid-hex"]);
        assert!(problems.iter().all(|p| p.severity == Severity::Error));
    }

    #[test]
    fn reports_duplicate_properties_at_the_later_one() {
        let css = ".a {\n  color: red;\n  color: blue;\n}\n";
        let report = StyleLinter::default().lint(Path::new("a.css"), css, false);

        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].line, 3);
        assert_eq!(report.diagnostics[0].column, 3);
        assert_eq!(report.content, css);
    }

    #[test]
    fn fixes_fixable_problems() {
        let css = ".a {\n  color: red;\n  color: #ffffff;\n  margin: 0px 0.5px;\n}\n";
        let report = StyleLinter::default().lint(Path::new("a.css"), css, true);

        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(report.content, ".a {\n  \n  color: #fff;\n  margin: 0 0.5px;\n}\n");
    }

    #[test]
    fn keeps_unfixable_problems_when_fixing() {
        let css = ".a { color: #12; padding: 0em; }";
        let report = StyleLinter::default().lint(Path::new("a.css"), css, true);

        assert_eq!(report.content, ".a { color: #12; padding: 0; }");
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].rule.as_deref(), Some("color-no-invalid-hex"));
    }

    #[test]
    fn fixing_is_idempotent() {
        let linter = StyleLinter::default();
        let css = ".a { margin: 0px; color: #AABBCC; color: red }";

        let first = linter.lint(Path::new("a.css"), css, true);
        let second = linter.lint(Path::new("a.css"), &first.content, true);

        assert_eq!(first.content, second.content);
        assert!(second.diagnostics.is_empty());
    }

    #[test]
    fn ignores_strings_and_comments() {
        let css = ".a { content: \"{ } ; #zz\"; /* color: red; color: red; {} */ }";
        let problems = StyleLinter::default().problems(css);

        assert!(problems.is_empty(), "{:?}", problems);
    }

    #[test]
    fn ignores_url_fragments() {
        let css = ".a { fill: url(#gradient); mask: url('#m'); }";
        assert!(StyleLinter::default().problems(css).is_empty());
    }

    #[test]
    fn rules_can_be_disabled() {
        let mut overrides = HashMap::new();
        overrides.insert("block-no-empty".to_string(), RuleLevel::OFF);
        let linter = StyleLinter::new(&LintOptions { rules: overrides });

        assert!(linter.problems(".a {}").is_empty());
    }
}
