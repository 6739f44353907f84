//! The renderer seam: turns a markdown body into an opaque document plus its
//! heading outline.

use crate::pattern::slugify;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use thiserror::Error;

/// A heading found while walking a rendered document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub depth: u8,
    pub slug: String,
    pub text: String,
}

/// Opaque handle to a rendered body, handed on to the page layer untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    html: String,
}

impl RenderedDocument {
    pub fn new(html: impl Into<String>) -> Self {
        RenderedDocument { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

/// What a renderer produces for one body.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub document: RenderedDocument,
    /// In document order, repeated text kept as-is.
    pub headings: Vec<Heading>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

/// Transforms markdown bodies. Implementations must be safe to share across
/// the rebuild worker pool.
pub trait Renderer: Send + Sync {
    fn render(&self, source: &str) -> Result<Rendered, RenderError>;
}

/// CommonMark renderer backed by pulldown-cmark.
#[derive(Debug, Clone)]
pub struct CommonMarkRenderer {
    options: Options,
}

impl Default for CommonMarkRenderer {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
        CommonMarkRenderer { options }
    }
}

impl Renderer for CommonMarkRenderer {
    fn render(&self, source: &str) -> Result<Rendered, RenderError> {
        let events: Vec<Event<'_>> = Parser::new_ext(source, self.options).collect();
        let headings = collect_headings(&events);

        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());

        Ok(Rendered {
            document: RenderedDocument::new(out),
            headings,
        })
    }
}

fn collect_headings(events: &[Event<'_>]) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut open: Option<(u8, Option<&CowStr<'_>>, String)> = None;

    for event in events {
        match event {
            Event::Start(Tag::Heading { level, id, .. }) => {
                open = Some((*level as u8, id.as_ref(), String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, buf)) = open.as_mut() {
                    buf.push_str(text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some((_, _, buf)) = open.as_mut() {
                    buf.push(' ');
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((depth, id, text)) = open.take() {
                    let text = text.trim().to_string();
                    let slug = match id {
                        Some(id) => id.to_string(),
                        None => slugify(&text),
                    };
                    headings.push(Heading { depth, slug, text });
                }
            }
            _ => {}
        }
    }

    headings
}
