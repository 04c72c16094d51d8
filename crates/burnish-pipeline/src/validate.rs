//! Offline HTML validation.
//!
//! [`HtmlValidator`] is a small rule engine. Element rules run on the tree
//! html5ever builds; tag nesting and the doctype are checked on the tokens
//! from [`crate::html`], which keep source positions. Severities are raw
//! numbers the same way external validators report them; the markup stage
//! decides which of them become diagnostics.

use std::collections::{HashMap, HashSet, VecDeque};

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use serde::Deserialize;

use crate::diagnostic::LineIndex;
use crate::html::{is_void, tokenize, StartTag, Token};

/// A message produced by a validator, before severity filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    pub line: usize,
    pub column: usize,
    /// Raw severity level; only 1 and 2 are meaningful
    pub severity: u8,
    pub message: String,
    pub rule_id: String,
    pub selector: Option<String>,
}

/// Validates rendered markup.
pub trait MarkupValidator: Send + Sync {
    /// Tool name shown in diagnostics.
    fn tool(&self) -> &'static str;

    fn validate(&self, markup: &str) -> Vec<ValidationMessage>;
}

/// Rule level as written in configuration: "off", "warn", "error" or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawLevel")]
pub struct RuleLevel(pub u8);

impl RuleLevel {
    pub const OFF: Self = Self(0);
    pub const WARN: Self = Self(1);
    pub const ERROR: Self = Self(2);

    pub fn is_off(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Number(u8),
    Name(String),
}

impl TryFrom<RawLevel> for RuleLevel {
    type Error = String;

    fn try_from(raw: RawLevel) -> Result<Self, Self::Error> {
        match raw {
            RawLevel::Number(n) => Ok(Self(n)),
            RawLevel::Name(name) => match name.as_str() {
                "off" => Ok(Self::OFF),
                "warn" => Ok(Self::WARN),
                "error" => Ok(Self::ERROR),
                other => Err(format!("unknown rule level '{}'", other)),
            },
        }
    }
}

/// Validator configuration.
///
/// Three rules are surfaced as named toggles because sites commonly disable
/// them; everything else can be tuned through `rules`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Enable `no-trailing-whitespace`
    pub trailing_whitespace: bool,

    /// Enable `input-missing-label`
    pub input_missing_label: bool,

    /// Enable `require-sri` (subresource integrity on external assets)
    pub require_sri: bool,

    /// Per-rule level overrides
    pub rules: HashMap<String, RuleLevel>,
}

/// Rule identifiers with their default levels.
pub const RULES: &[(&str, RuleLevel)] = &[
    ("doctype-html", RuleLevel::ERROR),
    ("element-required-attributes", RuleLevel::ERROR),
    ("wcag/h37", RuleLevel::ERROR),
    ("no-dup-id", RuleLevel::ERROR),
    ("close-order", RuleLevel::ERROR),
    ("deprecated", RuleLevel::ERROR),
    ("no-inline-style", RuleLevel::WARN),
    ("no-trailing-whitespace", RuleLevel::ERROR),
    ("input-missing-label", RuleLevel::ERROR),
    ("require-sri", RuleLevel::ERROR),
];

const DEPRECATED: &[&str] = &[
    "acronym", "applet", "basefont", "big", "blink", "center", "dir", "font", "frame", "frameset",
    "marquee", "strike", "tt",
];

const UNLABELLED_INPUT_TYPES: &[&str] = &["hidden", "submit", "reset", "button", "image"];

/// Built-in rule-based HTML validator.
#[derive(Debug, Clone)]
pub struct HtmlValidator {
    levels: HashMap<&'static str, RuleLevel>,
}

impl HtmlValidator {
    pub fn new(options: &ValidationOptions) -> Self {
        let mut levels: HashMap<&'static str, RuleLevel> = RULES.iter().copied().collect();

        let toggles = [
            ("no-trailing-whitespace", options.trailing_whitespace),
            ("input-missing-label", options.input_missing_label),
            ("require-sri", options.require_sri),
        ];
        for (rule, enabled) in toggles {
            if !enabled {
                levels.insert(rule, RuleLevel::OFF);
            }
        }

        for (rule, level) in &options.rules {
            match RULES.iter().find(|(id, _)| *id == rule.as_str()) {
                Some(&(id, _)) => {
                    levels.insert(id, *level);
                }
                None => tracing::warn!("Unknown HTML validation rule '{}' in config", rule),
            }
        }

        Self { levels }
    }

    /// Current level of a rule.
    pub fn level(&self, rule: &str) -> RuleLevel {
        self.levels.get(rule).copied().unwrap_or(RuleLevel::OFF)
    }
}

impl Default for HtmlValidator {
    fn default() -> Self {
        Self::new(&ValidationOptions::default())
    }
}

/// Collects messages for one document.
struct Report<'a> {
    validator: &'a HtmlValidator,
    text: &'a str,
    index: LineIndex,
    messages: Vec<ValidationMessage>,
}

impl Report<'_> {
    fn push(&mut self, rule: &str, offset: usize, message: String, selector: Option<String>) {
        let level = self.validator.level(rule);
        if level.is_off() {
            return;
        }
        let (line, column) = self.index.position(self.text, offset);
        self.messages.push(ValidationMessage {
            line,
            column,
            severity: level.0,
            message,
            rule_id: rule.to_string(),
            selector,
        });
    }
}

impl MarkupValidator for HtmlValidator {
    fn tool(&self) -> &'static str {
        "HtmlValidate"
    }

    fn validate(&self, markup: &str) -> Vec<ValidationMessage> {
        let tokens = tokenize(markup);
        let mut report = Report {
            validator: self,
            text: markup,
            index: LineIndex::new(markup),
            messages: Vec::new(),
        };

        check_doctype(&tokens, &mut report);
        check_close_order(&tokens, &mut report);
        check_elements(&elements(markup, &tokens), &mut report);
        check_trailing_whitespace(markup, &mut report);

        report.messages
    }
}

fn check_doctype(tokens: &[Token], report: &mut Report<'_>) {
    let first = tokens.iter().find(|t| match t {
        Token::Text { raw, .. } => !raw.trim().is_empty(),
        Token::Comment { .. } => false,
        _ => true,
    });

    let ok = matches!(first, Some(Token::Doctype { raw, .. })
        if raw.to_ascii_lowercase().starts_with("<!doctype html"));
    if !ok {
        report.push(
            "doctype-html",
            0,
            "<!DOCTYPE html> is missing".to_string(),
            None,
        );
    }
}

/// Start and end tags must nest. The parsed tree silently repairs this, so
/// it is checked on the source tokens.
fn check_close_order(tokens: &[Token], report: &mut Report<'_>) {
    let mut stack: Vec<&StartTag> = Vec::new();

    for token in tokens {
        match token {
            Token::Start(tag) => {
                if !is_void(&tag.name) && !tag.self_closing {
                    stack.push(tag);
                }
            }
            Token::End { name, offset, .. } => {
                if is_void(name) {
                    continue;
                }
                match stack.iter().rposition(|t| &t.name == name) {
                    Some(pos) if pos == stack.len() - 1 => {
                        stack.pop();
                    }
                    Some(pos) => {
                        let unclosed = stack[stack.len() - 1];
                        report.push(
                            "close-order",
                            *offset,
                            format!(
                                "Mismatched close-tag, expected '</{}>' but found '</{}>'",
                                unclosed.name, name
                            ),
                            Some(unclosed.selector()),
                        );
                        stack.truncate(pos);
                    }
                    None => report.push(
                        "close-order",
                        *offset,
                        format!("Stray end tag '</{}>'", name),
                        None,
                    ),
                }
            }
            _ => {}
        }
    }

    for tag in stack.iter().rev() {
        if !implicitly_closed(&tag.name) {
            report.push(
                "close-order",
                tag.offset,
                format!("Unclosed element '<{}>'", tag.name),
                Some(tag.selector()),
            );
        }
    }
}

/// Elements whose end tag is optional in practice.
fn implicitly_closed(name: &str) -> bool {
    matches!(
        name,
        "html" | "head" | "body" | "li" | "p" | "dt" | "dd" | "option" | "tr" | "td" | "th"
    )
}

/// An element of the parsed document that has a start tag in the source.
#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    /// Byte offset of the start tag
    offset: usize,
    /// Has a `<label>` ancestor
    in_label: bool,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }

    fn selector(&self) -> String {
        match self.attr("id") {
            Some(id) if !id.is_empty() => format!("{}#{}", self.name, id),
            _ => self.name.clone(),
        }
    }
}

/// Parse `markup` with html5ever and list its elements in document order.
///
/// The n-th element named `x` takes its position from the n-th `<x` start
/// tag in the source. Elements the parser implied (a missing `<body>`, say)
/// have no start tag and are left out.
fn elements(markup: &str, tokens: &[Token]) -> Vec<Element> {
    let dom = parse_document(RcDom::default(), Default::default()).one(markup);

    let mut positions: HashMap<&str, VecDeque<&StartTag>> = HashMap::new();
    for token in tokens {
        if let Token::Start(tag) = token {
            positions.entry(tag.name.as_str()).or_default().push_back(tag);
        }
    }

    let mut found = Vec::new();
    collect_elements(&dom.document, false, &mut positions, &mut found);
    found
}

fn collect_elements<'a>(
    node: &Handle,
    in_label: bool,
    positions: &mut HashMap<&'a str, VecDeque<&'a StartTag>>,
    found: &mut Vec<Element>,
) {
    let mut in_label = in_label;

    if let NodeData::Element { name, attrs, .. } = &node.data {
        let tag_name = name.local.to_string().to_ascii_lowercase();
        let start = positions
            .get_mut(tag_name.as_str())
            .and_then(VecDeque::pop_front);
        if let Some(start) = start {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect();
            found.push(Element {
                name: tag_name.clone(),
                attrs,
                offset: start.offset,
                in_label,
            });
        }
        in_label |= tag_name == "label";
    }

    for child in node.children.borrow().iter() {
        collect_elements(child, in_label, positions, found);
    }
}

/// Checks over the parsed element tree.
fn check_elements(elements: &[Element], report: &mut Report<'_>) {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let label_targets: HashSet<&str> = elements
        .iter()
        .filter(|e| e.name == "label")
        .filter_map(|e| e.attr("for"))
        .collect();

    for element in elements {
        check_element(element, report);

        if let Some(id) = element.attr("id").filter(|id| !id.is_empty()) {
            if !seen_ids.insert(id) {
                report.push(
                    "no-dup-id",
                    element.offset,
                    format!("Duplicate ID \"{}\"", id),
                    Some(element.selector()),
                );
            }
        }

        if element.name != "input" || element.in_label {
            continue;
        }
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        if UNLABELLED_INPUT_TYPES.contains(&kind.as_str()) {
            continue;
        }
        let labelled = element
            .attr("id")
            .is_some_and(|id| label_targets.contains(id))
            || element.has_attr("aria-label")
            || element.has_attr("aria-labelledby");
        if !labelled {
            report.push(
                "input-missing-label",
                element.offset,
                "<input> element does not have a <label>".to_string(),
                Some(element.selector()),
            );
        }
    }
}

fn check_element(tag: &Element, report: &mut Report<'_>) {
    if tag.name == "html" && tag.attr("lang").map_or(true, |l| l.trim().is_empty()) {
        report.push(
            "element-required-attributes",
            tag.offset,
            "<html> is missing required \"lang\" attribute".to_string(),
            Some(tag.selector()),
        );
    }

    if tag.name == "img" && !tag.has_attr("alt") {
        report.push(
            "wcag/h37",
            tag.offset,
            "<img> is missing required \"alt\" attribute".to_string(),
            Some(tag.selector()),
        );
    }

    if DEPRECATED.contains(&tag.name.as_str()) {
        report.push(
            "deprecated",
            tag.offset,
            format!("<{}> is deprecated", tag.name),
            Some(tag.selector()),
        );
    }

    if tag.has_attr("style") {
        report.push(
            "no-inline-style",
            tag.offset,
            "Inline style is not allowed".to_string(),
            Some(tag.selector()),
        );
    }

    let external = |url: &str| {
        url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//")
    };
    let needs_sri = match tag.name.as_str() {
        "script" => tag.attr("src").is_some_and(external),
        "link" => {
            tag.attr("rel")
                .is_some_and(|r| r.eq_ignore_ascii_case("stylesheet"))
                && tag.attr("href").is_some_and(external)
        }
        _ => false,
    };
    if needs_sri && !tag.has_attr("integrity") {
        report.push(
            "require-sri",
            tag.offset,
            "SRI \"integrity\" attribute is required on external resources".to_string(),
            Some(tag.selector()),
        );
    }
}

fn check_trailing_whitespace(markup: &str, report: &mut Report<'_>) {
    let mut offset = 0;
    for line in markup.split('\n') {
        let content = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = content.trim_end_matches([' ', '\t']);
        if trimmed.len() < content.len() {
            report.push(
                "no-trailing-whitespace",
                offset + trimmed.len(),
                "Trailing whitespace".to_string(),
                None,
            );
        }
        offset += line.len() + 1;
    }
}
