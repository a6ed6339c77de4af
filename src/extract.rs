//! Scrapes the upstream board markup into a [`Board`].
//!
//! The upstream renders an `<h3>` topic heading followed by a table whose
//! first row is a header and whose remaining rows carry three cells: the
//! sequence number, the author cell, and the message body. The author cell
//! mixes plain text with `<font color=...>` runs for the name, the `@XXXXXXX`
//! id and an optional magenta decoration, none of which are guaranteed to be
//! present.
//!
//! Rows are only found inside a `<table>`: the HTML5 tree builder discards
//! `<tr>`/`<td>` that appear outside one, and the board always wraps them.

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use crate::board::{Board, Message};

/// Label the upstream prepends to every topic heading.
const TOPIC_PREFIX_CHARS: usize = 5;
const DECORATION_COLOR: &str = "magenta";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("upstream markup has neither a topic heading nor message rows")]
    Malformed,
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("invalid author id pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Compiled selectors and patterns; build once and share.
pub struct Extractor {
    heading: Selector,
    row: Selector,
    cell: Selector,
    font: Selector,
    colored_font: Selector,
    author_id: Regex,
}

fn selector(css: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{css}: {e:?}")))
}

impl Extractor {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            heading: selector("h3")?,
            row: selector("tr")?,
            cell: selector("td")?,
            font: selector("font")?,
            colored_font: selector("font[color]")?,
            author_id: Regex::new(r"@[A-Za-z0-9]{7}")?,
        })
    }

    pub fn extract(&self, html: &str) -> Result<Board, ExtractError> {
        let document = Html::parse_document(html);

        let topic = document
            .select(&self.heading)
            .next()
            .map(|heading| topic_text(&heading.inner_html()));

        let messages: Vec<Message> = document
            .select(&self.row)
            .skip(1)
            .filter_map(|row| self.message(row))
            .collect();

        if topic.is_none() && messages.is_empty() {
            return Err(ExtractError::Malformed);
        }

        Ok(Board { topic, messages })
    }

    fn message(&self, row: ElementRef<'_>) -> Option<Message> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        let [number, name_cell, body] = cells.as_slice() else {
            return None;
        };

        let name_text = text(*name_cell);

        let author_name_color = name_cell
            .select(&self.colored_font)
            .next()
            .filter(|font| !text(*font).starts_with('@'))
            .and_then(|font| color(font));

        let author_id = self
            .author_id
            .find(&name_text)
            .map(|m| m.as_str().to_string());

        let author_id_color = name_cell
            .select(&self.font)
            .find(|font| single_string(*font).is_some_and(|s| s.contains('@')))
            .and_then(|font| color(font));

        let decoration_text = name_cell
            .select(&self.font)
            .last()
            .filter(|font| font.value().attr("color") == Some(DECORATION_COLOR))
            .map(|font| text(font));

        let mut author_name = name_text;
        if let Some(id) = &author_id {
            author_name = author_name.replace(id.as_str(), "");
        }
        if let Some(decoration) = decoration_text.as_deref().filter(|d| !d.is_empty()) {
            author_name = author_name.replace(decoration, "");
        }

        Some(Message {
            sequence_number: text(*number),
            author_name: author_name.trim().to_string(),
            author_name_color,
            author_id,
            author_id_color,
            decoration_text,
            body: text_with_breaks(*body),
        })
    }
}

fn text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Text of an element whose content is one text run, possibly wrapped in
/// single-child elements. Mixed content yields `None`.
fn single_string<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    let mut children = element.children();
    let only = children.next()?;
    if children.next().is_some() {
        return None;
    }
    match only.value() {
        Node::Text(t) => Some(&**t),
        Node::Element(_) => ElementRef::wrap(only).and_then(single_string),
        _ => None,
    }
}

fn color(element: ElementRef<'_>) -> Option<String> {
    element.value().attr("color").map(str::to_string)
}

fn replace_break_markup(s: &str) -> String {
    s.replace("<br>", "\n").replace("<br/>", "\n")
}

fn topic_text(inner_html: &str) -> String {
    replace_break_markup(inner_html)
        .chars()
        .skip(TOPIC_PREFIX_CHARS)
        .collect()
}

/// Text content where `<br>` elements, and `<br>` written out as escaped text,
/// both become newlines.
fn text_with_breaks(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    replace_break_markup(&out)
}
