//! Markdown to restricted HTML.
//!
//! Rendering happens in two passes. pulldown-cmark turns the Markdown into
//! HTML (raw HTML in the input is passed through at this stage), then
//! ammonia parses that HTML into a DOM and rebuilds it keeping only what
//! [`AllowedTag`] and [`AllowedAttr`] permit. Nothing reaches the output
//! without going through the DOM walk.
//!
//! Characters in the surviving text that Markdown would act on are written
//! as numeric character references, so feeding the output back in renders
//! the same fragment.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};

use ammonia::{Builder, UrlRelative};
use pulldown_cmark::{html, CowStr, Event, Options, Parser};
use serde::Serialize;

pub const DEFAULT_MAX_INPUT_BYTES: usize = 32 * 1024;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Appended when the rendered fragment had to be cut to fit.
pub const TRUNCATION_MARKER: &str = " [\u{2026}]";

/// Elements removed together with everything inside them.
const DROPPED_WITH_CONTENT: [&str; 5] = ["script", "style", "iframe", "noscript", "template"];

const LINK_REL: &str = "noopener noreferrer nofollow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedTag {
    P,
    Br,
    Strong,
    Em,
    Code,
    Pre,
    Blockquote,
    Ul,
    Ol,
    Li,
    A,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl AllowedTag {
    pub const ALL: [AllowedTag; 17] = [
        AllowedTag::P,
        AllowedTag::Br,
        AllowedTag::Strong,
        AllowedTag::Em,
        AllowedTag::Code,
        AllowedTag::Pre,
        AllowedTag::Blockquote,
        AllowedTag::Ul,
        AllowedTag::Ol,
        AllowedTag::Li,
        AllowedTag::A,
        AllowedTag::H1,
        AllowedTag::H2,
        AllowedTag::H3,
        AllowedTag::H4,
        AllowedTag::H5,
        AllowedTag::H6,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            AllowedTag::P => "p",
            AllowedTag::Br => "br",
            AllowedTag::Strong => "strong",
            AllowedTag::Em => "em",
            AllowedTag::Code => "code",
            AllowedTag::Pre => "pre",
            AllowedTag::Blockquote => "blockquote",
            AllowedTag::Ul => "ul",
            AllowedTag::Ol => "ol",
            AllowedTag::Li => "li",
            AllowedTag::A => "a",
            AllowedTag::H1 => "h1",
            AllowedTag::H2 => "h2",
            AllowedTag::H3 => "h3",
            AllowedTag::H4 => "h4",
            AllowedTag::H5 => "h5",
            AllowedTag::H6 => "h6",
        }
    }

    /// Attributes kept on this element; everything else is dropped.
    pub const fn attributes(self) -> &'static [AllowedAttr] {
        match self {
            AllowedTag::A => &[AllowedAttr::Href, AllowedAttr::Title],
            AllowedTag::P
            | AllowedTag::Br
            | AllowedTag::Strong
            | AllowedTag::Em
            | AllowedTag::Code
            | AllowedTag::Pre
            | AllowedTag::Blockquote
            | AllowedTag::Ul
            | AllowedTag::Ol
            | AllowedTag::Li
            | AllowedTag::H1
            | AllowedTag::H2
            | AllowedTag::H3
            | AllowedTag::H4
            | AllowedTag::H5
            | AllowedTag::H6 => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedAttr {
    Href,
    Title,
}

impl AllowedAttr {
    pub const fn name(self) -> &'static str {
        match self {
            AllowedAttr::Href => "href",
            AllowedAttr::Title => "title",
        }
    }
}

/// Schemes accepted in `href`. Relative URLs are always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlScheme {
    Http,
    Https,
    Mailto,
}

impl UrlScheme {
    pub const ALL: [UrlScheme; 3] = [UrlScheme::Http, UrlScheme::Https, UrlScheme::Mailto];

    pub const fn name(self) -> &'static str {
        match self {
            UrlScheme::Http => "http",
            UrlScheme::Https => "https",
            UrlScheme::Mailto => "mailto",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("input is {len} bytes, the limit is {max}")]
    InputTooLarge { len: usize, max: usize },
}

/// HTML fragment produced by [`Sanitizer::sanitize`].
///
/// There is no public constructor; holding one means the text went through
/// the allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SafeHtml(String);

impl SafeHtml {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SafeHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeHtml {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_input_bytes: usize,
    max_output_bytes: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INPUT_BYTES, DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl Sanitizer {
    /// `max_output_bytes` is raised to fit at least the truncation marker.
    pub fn new(max_input_bytes: usize, max_output_bytes: usize) -> Self {
        Self {
            max_input_bytes,
            max_output_bytes: max_output_bytes.max(TRUNCATION_MARKER.len() * 2),
        }
    }

    pub fn max_input_bytes(&self) -> usize {
        self.max_input_bytes
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn sanitize(&self, raw: &str) -> Result<SafeHtml, SanitizeError> {
        if raw.len() > self.max_input_bytes {
            return Err(SanitizeError::InputTooLarge { len: raw.len(), max: self.max_input_bytes });
        }
        let rendered = render(raw);
        if rendered.len() <= self.max_output_bytes {
            return Ok(SafeHtml(rendered));
        }
        tracing::debug!(len = rendered.len(), max = self.max_output_bytes, "truncating rendered body");
        Ok(SafeHtml(self.render_truncated(raw)))
    }

    /// Re-render the longest input prefix whose output fits next to the marker.
    ///
    /// Cutting the input instead of the HTML keeps the result well formed.
    fn render_truncated(&self, raw: &str) -> String {
        let budget = self.max_output_bytes - TRUNCATION_MARKER.len();
        let ends: Vec<usize> = raw.char_indices().map(|(i, _)| i).chain([raw.len()]).collect();

        // `lo` chars are known to fit; `hi` is the most that still might.
        let (mut lo, mut hi) = (0usize, ends.len() - 1);
        let mut best = String::new();
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            let candidate = render(&raw[..ends[mid]]);
            if candidate.len() <= budget {
                best = candidate;
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        best.push_str(TRUNCATION_MARKER);
        best
    }
}

fn render(raw: &str) -> String {
    let markdown = markdown_to_html(raw);
    let cleaned = policy().clean(&markdown).to_string();
    escape_markdown_text(unwrap_single_paragraph(&cleaned))
}

fn markdown_to_html(raw: &str) -> String {
    // Single newlines become <br>, like a plain textarea would suggest. No
    // trailing newline is emitted so a second pass sees the same text.
    let events = Parser::new_ext(raw, Options::empty()).map(|event| match event {
        Event::SoftBreak | Event::HardBreak => Event::InlineHtml(CowStr::Borrowed("<br>")),
        other => other,
    });
    let mut out = String::with_capacity(raw.len() + raw.len() / 2);
    html::push_html(&mut out, events);
    out
}

fn policy() -> Builder<'static> {
    let tags: HashSet<&'static str> = AllowedTag::ALL.iter().map(|t| t.name()).collect();
    let tag_attributes: HashMap<&'static str, HashSet<&'static str>> = AllowedTag::ALL
        .iter()
        .filter(|t| !t.attributes().is_empty())
        .map(|t| (t.name(), t.attributes().iter().map(|a| a.name()).collect()))
        .collect();
    let schemes: HashSet<&'static str> = UrlScheme::ALL.iter().map(|s| s.name()).collect();

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .tag_attributes(tag_attributes)
        .generic_attributes(HashSet::new())
        .url_schemes(schemes)
        .url_relative(UrlRelative::PassThrough)
        .link_rel(Some(LINK_REL))
        .clean_content_tags(DROPPED_WITH_CONTENT.into_iter().collect())
        .strip_comments(true);
    builder
}

/// `<p>x</p>` becomes `x`; anything with more structure is left alone.
fn unwrap_single_paragraph(html: &str) -> &str {
    let trimmed = html.trim();
    match trimmed.strip_prefix("<p>").and_then(|s| s.strip_suffix("</p>")) {
        Some(inner) if !inner.contains("<p>") && !inner.contains("</p>") => inner,
        _ => trimmed,
    }
}

/// Rewrites Markdown-significant characters in text nodes as `&#N;`.
///
/// Runs on serialized ammonia output, where every `<` outside a tag opens
/// one and attribute values are always double quoted. Block markers only
/// matter at the start of a line, inline ones anywhere.
fn escape_markdown_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + html.len() / 8);
    let mut chars = html.chars().peekable();
    let (mut in_tag, mut in_quotes, mut line_start) = (false, false, true);
    while let Some(c) = chars.next() {
        if in_tag {
            match c {
                '"' => in_quotes = !in_quotes,
                '>' if !in_quotes => in_tag = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        let at_line_start = line_start;
        line_start = c == '\n' || (line_start && c == ' ');
        match c {
            '<' => {
                in_tag = true;
                out.push(c);
            }
            '\\' | '`' | '*' | '_' => push_char_ref(&mut out, c),
            ']' if matches!(chars.peek(), Some('(' | '[' | ':')) => push_char_ref(&mut out, c),
            '#' | '-' | '+' | '=' | '~' if at_line_start => push_char_ref(&mut out, c),
            '0'..='9' if at_line_start => {
                out.push(c);
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    out.push(d);
                }
                // ordered list marker
                if let Some(delim) = chars.next_if(|n| matches!(n, '.' | ')')) {
                    push_char_ref(&mut out, delim);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn push_char_ref(out: &mut String, c: char) {
    let _ = write!(out, "&#{};", u32::from(c));
}
