//! Minimal HTML tokenizer shared by the validator and the beautifier.
//!
//! This is not a conforming HTML parser. It splits markup into tags, text,
//! comments and raw-text element bodies, keeping byte offsets so callers can
//! report positions.

use std::sync::LazyLock;

use regex::Regex;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<![^>]*>|<(/?)([a-zA-Z][a-zA-Z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#,
    )
    .unwrap()
});

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'=<>/]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

/// Elements without closing tags.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose body is kept verbatim.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea"];

/// Phrasing elements that stay on the surrounding text line.
pub const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "button", "cite", "code", "data", "dfn", "em", "i",
    "img", "input", "kbd", "label", "mark", "q", "s", "samp", "select", "small", "span",
    "strong", "sub", "sup", "textarea", "time", "u", "var", "wbr",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

pub fn is_inline(name: &str) -> bool {
    INLINE_ELEMENTS.contains(&name)
}

/// A start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    /// Lowercased element name
    pub name: String,
    /// Attributes in source order, names lowercased
    pub attrs: Vec<(String, Option<String>)>,
    pub self_closing: bool,
    pub raw: String,
    pub offset: usize,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }

    /// `tag#id` style selector for diagnostics.
    pub fn selector(&self) -> String {
        match self.attr("id") {
            Some(id) if !id.is_empty() => format!("{}#{}", self.name, id),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Doctype { raw: String, offset: usize },
    Comment { raw: String, offset: usize },
    Start(StartTag),
    End { name: String, raw: String, offset: usize },
    Text { raw: String, offset: usize },
    /// Body of a raw-text element, between its start and end tags.
    RawText { raw: String, offset: usize },
}

/// Split markup into tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let Some(caps) = TAG.captures_at(source, pos) else {
            break;
        };
        let whole = caps.get(0).map(|m| (m.start(), m.end(), m.as_str()));
        let Some((start, end, raw)) = whole else {
            break;
        };

        if start > pos {
            tokens.push(Token::Text {
                raw: source[pos..start].to_string(),
                offset: pos,
            });
        }
        pos = end;

        if raw.starts_with("<!--") {
            tokens.push(Token::Comment {
                raw: raw.to_string(),
                offset: start,
            });
            continue;
        }
        if raw.starts_with("<!") {
            tokens.push(Token::Doctype {
                raw: raw.to_string(),
                offset: start,
            });
            continue;
        }

        let name = caps[2].to_ascii_lowercase();
        if &caps[1] == "/" {
            tokens.push(Token::End {
                name,
                raw: raw.to_string(),
                offset: start,
            });
            continue;
        }

        let tag = StartTag {
            attrs: parse_attrs(&caps[3]),
            self_closing: &caps[4] == "/",
            raw: raw.to_string(),
            offset: start,
            name,
        };
        let raw_body = is_raw_text(&tag.name) && !tag.self_closing;
        let closing = format!("</{}", tag.name);
        tokens.push(Token::Start(tag));

        if raw_body {
            let body_end = find_ascii_ci(source, pos, &closing).unwrap_or(source.len());
            if body_end > pos {
                tokens.push(Token::RawText {
                    raw: source[pos..body_end].to_string(),
                    offset: pos,
                });
            }
            pos = body_end;
        }
    }

    if pos < source.len() {
        tokens.push(Token::Text {
            raw: source[pos..].to_string(),
            offset: pos,
        });
    }

    tokens
}

fn parse_attrs(raw: &str) -> Vec<(String, Option<String>)> {
    ATTR.captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string());
            (caps[1].to_ascii_lowercase(), value)
        })
        .collect()
}

/// Case-insensitive search for an ASCII needle.
fn find_ascii_ci(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    (from..=hay.len().saturating_sub(needle.len()))
        .find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_tags_text_and_comments() {
        let tokens = tokenize(r#"<!DOCTYPE html><p class="x">Hi<!-- c --></P>"#);

        assert!(matches!(tokens[0], Token::Doctype { .. }));
        match &tokens[1] {
            Token::Start(tag) => {
                assert_eq!(tag.name, "p");
                assert_eq!(tag.attr("class"), Some("x"));
                assert_eq!(tag.offset, 15);
            }
            other => panic!("expected start tag, got {:?}", other),
        }
        assert!(matches!(&tokens[2], Token::Text { raw, .. } if raw == "Hi"));
        assert!(matches!(tokens[3], Token::Comment { .. }));
        assert!(matches!(&tokens[4], Token::End { name, .. } if name == "p"));
    }

    #[test]
    fn keeps_raw_text_bodies_verbatim() {
        let tokens = tokenize("<script>if (a < b) { x('<p>'); }</script>");

        assert_eq!(tokens.len(), 3);
        assert!(matches!(
            &tokens[1],
            Token::RawText { raw, .. } if raw == "if (a < b) { x('<p>'); }"
        ));
        assert!(matches!(&tokens[2], Token::End { name, .. } if name == "script"));
    }

    #[test]
    fn parses_attribute_forms() {
        let tokens = tokenize(r#"<input type=text disabled value='a b' data-x="1">"#);

        let Token::Start(tag) = &tokens[0] else {
            panic!("expected start tag");
        };
        assert_eq!(tag.attr("type"), Some("text"));
        assert_eq!(tag.attr("disabled"), Some(""));
        assert_eq!(tag.attr("value"), Some("a b"));
        assert_eq!(tag.attr("data-x"), Some("1"));
    }

    #[test]
    fn builds_selectors() {
        let tokens = tokenize(r#"<div id="main"><img src="a.png">"#);

        let selectors: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Start(tag) => Some(tag.selector()),
                _ => None,
            })
            .collect();

        assert_eq!(selectors, vec!["div#main", "img"]);
    }
}
