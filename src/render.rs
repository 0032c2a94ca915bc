//! Mail body rendering
//!
//! The server renders each message as an HTML page. The readable part
//! sits in `div.samoware-RFC822-body` containers, between a child
//! marked `textBeg` and a child marked `textEnd`. Rendering happens in
//! two pure passes:
//!
//! 1. [`render`] walks the nodes between the markers and emits text
//!    with the forwarding markup (`<a>`, `<blockquote>`). Paragraph
//!    boundaries are emitted as `\r` so they survive the line collapse
//!    of the second pass.
//! 2. [`normalize`] collapses repeated separators, turns paragraph
//!    markers into a single blank line and trims the result.
//!
//! Attachments are found independently of the body markers.

use crate::error::{Error, Result};
use crate::mail::AttachmentRef;
use scraper::{ElementRef, Html, Node, Selector};

const BODY_SELECTOR: &str = "div.samoware-RFC822-body";
const ATTACHMENT_SELECTOR: &str = "cg-message-attachment";
const TEXT_BEGIN_CLASS: &str = "textBeg";
const TEXT_END_CLASS: &str = "textEnd";

const PARAGRAPH_MARK: char = '\r';
const RULE: &str = "\n----------\n";

/// Text and attachment references extracted from a message page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

/// How a node is rendered.
#[derive(Debug, Clone, Copy)]
enum NodeKind<'a> {
    Text(&'a str),
    Link {
        href: &'a str,
        element: ElementRef<'a>,
    },
    LineBreak,
    Rule,
    Paragraph(ElementRef<'a>),
    Division(ElementRef<'a>),
    ListItem(ElementRef<'a>),
    Quote(ElementRef<'a>),
    /// Style and script content never reaches the reader.
    Dropped,
    Other(ElementRef<'a>),
}

impl<'a> NodeKind<'a> {
    fn of(node: &'a Node, element: Option<ElementRef<'a>>) -> Self {
        match (node, element) {
            (Node::Text(text), _) => Self::Text(text),
            (Node::Element(el), Some(element)) => match el.name() {
                "a" => el
                    .attr("href")
                    .map_or(Self::Other(element), |href| Self::Link { href, element }),
                "br" => Self::LineBreak,
                "hr" => Self::Rule,
                "p" => Self::Paragraph(element),
                "div" => Self::Division(element),
                "li" => Self::ListItem(element),
                "blockquote" => Self::Quote(element),
                "style" | "script" => Self::Dropped,
                _ => Self::Other(element),
            },
            _ => Self::Dropped,
        }
    }
}

fn visit(kind: NodeKind<'_>, out: &mut String) {
    match kind {
        NodeKind::Text(text) => out.push_str(&render_text(text)),
        NodeKind::Link { href, element } => {
            out.push_str("<a href=\"");
            out.push_str(&escape(href));
            out.push_str("\">");
            visit_children(element, out);
            out.push_str("</a>");
        }
        NodeKind::LineBreak => out.push('\n'),
        NodeKind::Rule => out.push_str(RULE),
        NodeKind::Paragraph(element) => {
            out.push(PARAGRAPH_MARK);
            visit_children(element, out);
            out.push(PARAGRAPH_MARK);
        }
        NodeKind::Division(element) => {
            out.push('\n');
            visit_children(element, out);
            out.push('\n');
        }
        NodeKind::ListItem(element) => {
            visit_children(element, out);
            out.push('\n');
        }
        NodeKind::Quote(element) => {
            let mut inner = String::new();
            visit_children(element, &mut inner);
            out.push_str("<blockquote>");
            out.push_str(inner.trim());
            out.push_str("</blockquote>");
        }
        NodeKind::Dropped => {}
        NodeKind::Other(element) => visit_children(element, out),
    }
}

fn visit_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        visit(NodeKind::of(child.value(), ElementRef::wrap(child)), out);
    }
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Render the children of one body container between its markers.
fn render_body(body: ElementRef<'_>, out: &mut String) {
    let mut in_text = false;
    for child in body.children() {
        let element = ElementRef::wrap(child);
        if let Some(el) = element {
            if has_class(el, TEXT_BEGIN_CLASS) {
                in_text = true;
            }
            if has_class(el, TEXT_END_CLASS) {
                break;
            }
        }
        if in_text {
            visit(NodeKind::of(child.value(), element), out);
        }
    }
}

fn selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| Error::Render(format!("invalid selector {raw}: {e:?}")))
}

/// First pass: the raw marked-up text of every message body on the page.
///
/// # Errors
///
/// Returns [`Error::Render`] when the page has no message body.
pub fn render(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let bodies = selector(BODY_SELECTOR)?;
    let mut out = String::new();
    let mut found = false;
    for body in document.select(&bodies) {
        found = true;
        render_body(body, &mut out);
    }
    if !found {
        return Err(Error::Render("page has no message body".to_string()));
    }
    Ok(out)
}

/// Second pass: at most one blank line between blocks, no blank lines
/// at either end.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let text = collapse_runs(raw, PARAGRAPH_MARK, 1);
    let text = collapse_runs(text.trim(), '\n', 1);
    let text = text.trim().replace(PARAGRAPH_MARK, "\n\n");
    collapse_runs(&text, '\n', 2).trim().to_string()
}

/// Every attachment link on the page, wherever it appears.
///
/// # Errors
///
/// Returns [`Error::Render`] only if the attachment selector is invalid.
pub fn attachments(html: &str) -> Result<Vec<AttachmentRef>> {
    find_attachments(&Html::parse_document(html))
}

fn find_attachments(document: &Html) -> Result<Vec<AttachmentRef>> {
    let links = selector(ATTACHMENT_SELECTOR)?;
    Ok(document
        .select(&links)
        .filter_map(|el| {
            let el = el.value();
            Some(AttachmentRef {
                reference: el.attr("attachment-ref")?.to_string(),
                name: el.attr("attachment-name")?.to_string(),
            })
        })
        .collect())
}

/// Both passes plus attachment discovery.
///
/// # Errors
///
/// Returns [`Error::Render`] when the page has no message body.
pub fn render_page(html: &str) -> Result<RenderedPage> {
    let text = normalize(&render(html)?);
    let attachments = attachments(html)?;
    Ok(RenderedPage { text, attachments })
}

fn render_text(raw: &str) -> String {
    let flat = raw.replace('\r', "");
    let flat = flat.trim_matches('\n').replace('\n', " ");
    escape(&collapse_runs(&flat, ' ', 1))
}

/// Replace every run of `ch` longer than `keep` with `keep` copies.
fn collapse_runs(text: &str, ch: char, keep: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0;
    for c in text.chars() {
        if c == ch {
            run += 1;
            if run > keep {
                continue;
            }
        } else {
            run = 0;
        }
        out.push(c);
    }
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
