//! Deterministic HTML formatting.

use serde::Deserialize;

use crate::html::{is_inline, is_void, tokenize, StartTag, Token};

/// Formats markup for stable, readable output.
pub trait Beautifier: Send + Sync {
    fn beautify(&self, markup: &str) -> String;
}

/// Beautifier options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeautifyOptions {
    /// Spaces per nesting level
    pub indent_size: usize,

    /// Indent `<head>` and `<body>` inside `<html>`
    pub indent_inner_html: bool,
}

impl Default for BeautifyOptions {
    fn default() -> Self {
        Self {
            indent_size: 4,
            indent_inner_html: false,
        }
    }
}

/// Re-indents block elements one per line and keeps phrasing content on the
/// text line. Raw-text element bodies are emitted verbatim.
#[derive(Debug, Clone, Default)]
pub struct HtmlBeautifier {
    options: BeautifyOptions,
}

impl HtmlBeautifier {
    pub fn new(options: BeautifyOptions) -> Self {
        Self { options }
    }
}

struct Writer<'a> {
    options: &'a BeautifyOptions,
    lines: Vec<String>,
    line: String,
    depth: usize,
}

impl Writer<'_> {
    fn indent(&self) -> String {
        " ".repeat(self.depth * self.options.indent_size)
    }

    fn flush(&mut self) {
        let text = self.line.trim();
        if !text.is_empty() {
            let line = format!("{}{}", self.indent(), text);
            self.lines.push(line);
        }
        self.line.clear();
    }

    fn block(&mut self, raw: &str) {
        self.flush();
        let line = format!("{}{}", self.indent(), raw.trim());
        self.lines.push(line);
    }

    fn inline(&mut self, raw: &str) {
        self.line.push_str(raw);
    }

    fn text(&mut self, raw: &str) {
        let collapsed = collapse_whitespace(raw);
        if self.line.is_empty() {
            self.line.push_str(collapsed.trim_start());
        } else {
            self.line.push_str(&collapsed);
        }
    }

    fn opens_level(&self, tag: &StartTag) -> bool {
        !(tag.name == "html" && !self.options.indent_inner_html)
    }
}

impl Beautifier for HtmlBeautifier {
    fn beautify(&self, markup: &str) -> String {
        let tokens = tokenize(markup);
        let mut out = Writer {
            options: &self.options,
            lines: Vec::new(),
            line: String::new(),
            depth: 0,
        };
        let mut open: Vec<bool> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Doctype { raw, .. } | Token::Comment { raw, .. } => out.block(raw),
                Token::Text { raw, .. } => out.text(raw),
                Token::RawText { raw, .. } => out.inline(raw),
                Token::End { name, raw, .. } => {
                    if is_inline(name) {
                        out.inline(raw);
                    } else {
                        if !is_void(name) && open.pop().unwrap_or(false) {
                            out.flush();
                            out.depth = out.depth.saturating_sub(1);
                        }
                        out.block(raw);
                    }
                }
                Token::Start(tag) => {
                    if crate::html::is_raw_text(&tag.name) && !tag.self_closing {
                        // Keep start tag, body and end tag together.
                        let mut unit = tag.raw.clone();
                        let mut j = i + 1;
                        if let Some(Token::RawText { raw, .. }) = tokens.get(j) {
                            unit.push_str(raw);
                            j += 1;
                        }
                        if let Some(Token::End { name, raw, .. }) = tokens.get(j) {
                            if name == &tag.name {
                                unit.push_str(raw);
                                j += 1;
                            }
                        }
                        if is_inline(&tag.name) {
                            out.inline(&unit);
                        } else {
                            out.flush();
                            let line = format!("{}{}", out.indent(), unit.trim_start());
                            out.lines.push(line);
                        }
                        i = j;
                        continue;
                    }

                    if is_inline(&tag.name) {
                        out.inline(&tag.raw);
                    } else if let Some(end) = inline_run_end(&tokens, i, &tag.name) {
                        out.block(&single_line(&tokens[i..=end]));
                        i = end + 1;
                        continue;
                    } else if is_void(&tag.name) || tag.self_closing {
                        out.block(&tag.raw);
                    } else {
                        out.block(&tag.raw);
                        let indents = out.opens_level(tag);
                        if indents {
                            out.depth += 1;
                        }
                        open.push(indents);
                    }
                }
            }
            i += 1;
        }

        out.flush();
        let mut result = out.lines.join("\n");
        result.push('\n');
        result
    }
}

/// If the block element starting at `start` holds only text and phrasing
/// content, return the index of its end tag.
fn inline_run_end(tokens: &[Token], start: usize, name: &str) -> Option<usize> {
    if is_void(name) {
        return None;
    }
    for (offset, token) in tokens[start + 1..].iter().enumerate() {
        match token {
            Token::Text { .. } => {}
            Token::Start(tag) if is_inline(&tag.name) && !crate::html::is_raw_text(&tag.name) => {}
            Token::End { name: end, .. } if end == name => return Some(start + 1 + offset),
            Token::End { name: end, .. } if is_inline(end) => {}
            _ => return None,
        }
    }
    None
}

/// Join a start tag, its phrasing content and its end tag into one line.
fn single_line(tokens: &[Token]) -> String {
    let mut inner = String::new();
    for token in &tokens[1..tokens.len() - 1] {
        match token {
            Token::Text { raw, .. } => inner.push_str(&collapse_whitespace(raw)),
            Token::Start(tag) => inner.push_str(&tag.raw),
            Token::End { raw, .. } => inner.push_str(raw),
            _ => {}
        }
    }
    let open = match &tokens[0] {
        Token::Start(tag) => tag.raw.as_str(),
        _ => "",
    };
    let close = match &tokens[tokens.len() - 1] {
        Token::End { raw, .. } => raw.as_str(),
        _ => "",
    };
    format!("{}{}{}", open, inner.trim(), close)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn beautify(markup: &str) -> String {
        HtmlBeautifier::default().beautify(markup)
    }

    #[test]
    fn indents_block_elements() {
        let html = beautify(
            "<!DOCTYPE html><html lang=\"en\"><head><title>T</title></head>\
             <body><main><p>Hello   <b>big</b>\n world</p></main></body></html>",
        );

        assert_eq!(
            html,
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n\
             <head>\n\
             \x20   <title>T</title>\n\
             </head>\n\
             <body>\n\
             \x20   <main>\n\
             \x20       <p>Hello <b>big</b> world</p>\n\
             \x20   </main>\n\
             </body>\n\
             </html>\n"
        );
    }

    #[test]
    fn keeps_raw_text_verbatim() {
        let html = beautify("<div><pre>  a\n    b</pre><script>\nlet x = 1;\n</script></div>");

        assert!(html.contains("<pre>  a\n    b</pre>"));
        assert!(html.contains("<script>\nlet x = 1;\n</script>"));
    }

    #[test]
    fn is_idempotent() {
        let source = "<!DOCTYPE html>\n<html lang=\"en\"><body>\n<ul><li><a href=\"/\">Home</a></li>\
                      <li>Two</li></ul><img src=\"x.png\" alt=\"x\"><!-- note --></body></html>";

        let once = beautify(source);
        let twice = beautify(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn honours_indent_size() {
        let beautifier = HtmlBeautifier::new(BeautifyOptions {
            indent_size: 2,
            ..Default::default()
        });

        assert_eq!(beautifier.beautify("<div><p>x</p></div>"), "<div>\n  <p>x</p>\n</div>\n");
    }
}
