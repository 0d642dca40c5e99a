//! Markdown to sanitized HTML.

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};

use crate::types::{Html, Markdown};

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Render model output for display.
///
/// Raw HTML in the source is emitted as escaped text, and link or image
/// destinations using a scheme outside http/https/mailto are dropped.
/// `$...$` math is left as text for the typesetting pass in the view.
pub fn render_markdown(markdown: &Markdown) -> Html {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;
    let source = markdown.as_str();
    let events = Parser::new_ext(source, options).map(neutralize);

    let mut out = String::with_capacity(source.len() + source.len() / 2);
    html::push_html(&mut out, events);
    Html::from_sanitized(out)
}

fn neutralize(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        other => other,
    }
}

fn safe_destination(url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&url) {
        url
    } else {
        CowStr::Borrowed("")
    }
}

fn is_safe_url(url: &str) -> bool {
    // Browsers ignore embedded whitespace and control characters in schemes.
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    let scheme_end = compact.find(|c: char| matches!(c, ':' | '/' | '?' | '#'));
    match scheme_end {
        Some(idx) if compact[idx..].starts_with(':') => {
            let scheme = compact[..idx].to_ascii_lowercase();
            ALLOWED_SCHEMES.contains(&scheme.as_str())
        }
        // Relative reference, fragment or query.
        _ => true,
    }
}
