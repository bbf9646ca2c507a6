//! HTML conversion utilities used by parsers

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// Elements dropped entirely during markdown conversion
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "head", "template"];

/// Lines whose link text covers more than this share are boilerplate
const BOILERPLATE_LINK_SHARE: f64 = 0.9;

/// Check if content is HTML based on content type and body
pub fn is_html(content_type: Option<&str>, body: &str) -> bool {
    if let Some(ct) = content_type {
        let ct_lower = ct.to_lowercase();
        if ct_lower.contains("text/html") || ct_lower.contains("application/xhtml") {
            return true;
        }
    }

    let head: String = body.trim_start().chars().take(15).collect();
    let head = head.to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[derive(Default)]
struct RenderState {
    list_depth: usize,
    in_pre: bool,
}

/// Convert HTML to markdown
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut output = String::new();
    let mut state = RenderState::default();
    render_element(document.root_element(), &mut output, &mut state);

    let lines: Vec<&str> = output.lines().map(str::trim_end).collect();
    filter_excessive_newlines(lines.join("\n").trim())
}

fn render_children(element: ElementRef<'_>, output: &mut String, state: &mut RenderState) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(text, output, state),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_element(child, output, state);
                }
            }
            _ => {}
        }
    }
}

fn push_text(text: &str, output: &mut String, state: &RenderState) {
    if state.in_pre {
        output.push_str(text);
        return;
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        if !text.is_empty() && !output.is_empty() && !output.ends_with([' ', '\n']) {
            output.push(' ');
        }
        return;
    }

    let at_line_start = output.is_empty() || output.ends_with('\n');
    if text.starts_with(char::is_whitespace) && !at_line_start && !output.ends_with(' ') {
        output.push(' ');
    }
    output.push_str(&collapsed);
    if text.ends_with(char::is_whitespace) {
        output.push(' ');
    }
}

fn render_element(element: ElementRef<'_>, output: &mut String, state: &mut RenderState) {
    let name = element.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            output.push('\n');
            output.push_str(&"#".repeat(level));
            output.push(' ');
            render_children(element, output, state);
            output.push_str("\n\n");
        }
        "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "nav" | "table"
        | "tr" => {
            output.push('\n');
            render_children(element, output, state);
            output.push_str("\n\n");
        }
        "br" => output.push('\n'),
        "hr" => output.push_str("\n---\n"),
        "ul" | "ol" => {
            state.list_depth += 1;
            render_children(element, output, state);
            state.list_depth -= 1;
            if state.list_depth == 0 {
                output.push('\n');
            }
        }
        "li" => {
            output.push('\n');
            for _ in 0..state.list_depth.saturating_sub(1) {
                output.push_str("  ");
            }
            output.push_str("- ");
            render_children(element, output, state);
        }
        "strong" | "b" => wrap_inline(element, "**", output, state),
        "em" | "i" => wrap_inline(element, "*", output, state),
        "code" if !state.in_pre => wrap_inline(element, "`", output, state),
        "pre" => {
            output.push_str("\n```\n");
            state.in_pre = true;
            render_children(element, output, state);
            state.in_pre = false;
            output.push_str("\n```\n");
        }
        "blockquote" => {
            let mut inner = String::new();
            render_children(element, &mut inner, state);
            output.push('\n');
            for line in inner.trim().lines() {
                output.push_str("> ");
                output.push_str(line);
                output.push('\n');
            }
            output.push('\n');
        }
        "a" => match element.value().attr("href") {
            Some(href) => {
                let mut text = String::new();
                render_children(element, &mut text, state);
                output.push('[');
                output.push_str(text.trim());
                output.push_str("](");
                output.push_str(href);
                output.push(')');
            }
            None => render_children(element, output, state),
        },
        "img" => {
            if let Some(src) = element.value().attr("src") {
                let alt = element.value().attr("alt").unwrap_or_default();
                output.push_str(&format!("![{alt}]({src})"));
            }
        }
        _ => render_children(element, output, state),
    }
}

fn wrap_inline(element: ElementRef<'_>, marker: &str, output: &mut String, state: &mut RenderState) {
    let mut inner = String::new();
    render_children(element, &mut inner, state);
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return;
    }
    if inner.starts_with(' ') && !output.ends_with([' ', '\n']) {
        output.push(' ');
    }
    output.push_str(marker);
    output.push_str(trimmed);
    output.push_str(marker);
    if inner.ends_with(' ') {
        output.push(' ');
    }
}

/// Filter excessive newlines: keep at most 2 consecutive newlines
pub fn filter_excessive_newlines(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut newline_count = 0;

    for c in s.chars() {
        if c == '\n' {
            newline_count += 1;
            if newline_count <= 2 {
                result.push(c);
            }
        } else {
            newline_count = 0;
            result.push(c);
        }
    }

    result
}

/// Position and text of one inline markdown link `[text](target)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownLink {
    /// Byte offset of the opening `[`
    pub start: usize,
    /// Byte offset one past the closing `)`
    pub end: usize,
    /// Text between the outermost brackets
    pub text: String,
}

/// Find top-level inline links in one line of markdown
///
/// Nested brackets inside the link text (images inside links) are kept as
/// part of the text.
pub fn extract_markdown_links(line: &str) -> Vec<MarkdownLink> {
    let mut links = Vec::new();
    let mut square = 0usize;
    let mut round = 0usize;
    let mut start: Option<usize> = None;
    let mut text = String::new();

    for (pos, c) in line.char_indices() {
        match c {
            '[' => {
                square += 1;
                if square == 1 && round == 0 {
                    start = Some(pos);
                }
            }
            ']' => {
                square = square.saturating_sub(1);
                if square == 0 && round == 0 {
                    if let Some(s) = start {
                        text = line[s + 1..pos].to_string();
                    }
                }
            }
            '(' if square == 0 && round == 0 && start.is_some() => {
                // Only directly after `]` does `(` open a link target.
                if line[..pos].ends_with(']') {
                    round = 1;
                } else {
                    start = None;
                }
            }
            ')' if square == 0 && round == 1 => {
                if let Some(s) = start.take() {
                    links.push(MarkdownLink {
                        start: s,
                        end: pos + 1,
                        text: std::mem::take(&mut text),
                    });
                }
                round = 0;
            }
            _ => {}
        }
    }
    links
}

/// Drop navigation-like lines and replace links by their text
///
/// A line is dropped when its links cover more than 90% of it. Remaining
/// links keep only their visible text.
pub fn strip_boilerplate(markdown: &str) -> String {
    let mut output = Vec::new();
    for line in markdown.split('\n') {
        let links = extract_markdown_links(line);
        let link_len: usize = links.iter().map(|l| l.end - l.start).sum();
        if link_len > 0 && link_len as f64 > BOILERPLATE_LINK_SHARE * line.len() as f64 {
            continue;
        }

        let mut stripped = String::with_capacity(line.len());
        let mut pos = 0;
        for link in &links {
            stripped.push_str(&line[pos..link.start]);
            stripped.push_str(&link.text);
            pos = link.end;
        }
        stripped.push_str(&line[pos..]);
        output.push(stripped);
    }
    output.join("\n")
}

/// A link found in a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub url: String,
    pub text: String,
}

/// Parse a CSS selector, reporting the selector in the error
pub fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector '{selector}': {e}"))
}

/// Links of every element matching `selector`, resolved against `base_url`
///
/// Each element contributes its first non-blank text node and the first
/// `href` on the element itself or among its descendants. Elements missing
/// either are skipped.
pub fn extract_links(html: &str, base_url: &str, selector: &Selector) -> Vec<PageLink> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let href_selector = Selector::parse("[href]").ok();

    document
        .select(selector)
        .filter_map(|element| {
            let text = element.text().map(str::trim).find(|t| !t.is_empty())?;
            let href = element
                .value()
                .attr("href")
                .or_else(|| {
                    href_selector
                        .as_ref()
                        .and_then(|s| element.select(s).next())
                        .and_then(|e| e.value().attr("href"))
                })
                .map(str::trim)
                .filter(|h| !h.is_empty())?;
            let url = match &base {
                Some(base) => base.join(href).map(|u| u.to_string()).ok()?,
                None => href.to_string(),
            };
            Some(PageLink {
                url,
                text: text.to_string(),
            })
        })
        .collect()
}

/// Text content of the first element matching `selector`
pub fn select_text(html: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    document.select(selector).next().map(element_text)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}
