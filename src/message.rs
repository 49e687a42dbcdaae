//! Notification text rendering.
//!
//! The immediate-send path and the pending buffer's size estimate must agree
//! on per-item length; both go through `render_item`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::watcher::Link;

/// Everything from the first `.json` onwards is dropped from the footer link
static JSON_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.json.*$").expect("Invalid JSON suffix regex"));

/// Escape text for Telegram's HTML parse mode
fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Escape a value placed inside a single-quoted attribute
fn escape_attr(s: &str) -> String {
    escape_text(s).replace('\'', "&#39;").replace('"', "&quot;")
}

/// Length as the chat platform counts it
pub fn rendered_len(s: &str) -> usize {
    s.chars().count()
}

pub fn header(watcher_name: &str) -> String {
    format!("📣 <b>{}</b> 📣\n", escape_text(watcher_name))
}

pub fn footer(source_url: &str) -> String {
    format!(
        "\nMore articles: <a href='{}'>here</a>",
        escape_attr(&display_url(source_url))
    )
}

/// Source URL as shown to readers, without a trailing `.json...` suffix
pub fn display_url(source_url: &str) -> String {
    JSON_SUFFIX_RE.replace(source_url, "").into_owned()
}

/// One link line. `position` is zero-based; every line after the first
/// carries its own leading newline separator.
pub fn render_item(position: usize, link: &Link, numbered: bool) -> String {
    let anchor = format!(
        "<a href='{}' target='_blank'>{}</a>",
        escape_attr(&link.url),
        escape_text(&link.title)
    );
    let line = if numbered {
        format!("{}. {}", position + 1, anchor)
    } else {
        anchor
    };
    if position == 0 {
        line
    } else {
        format!("\n{}", line)
    }
}

/// Link lines, numbered unless there is exactly one link
pub fn render_body(links: &[Link]) -> String {
    let numbered = links.len() > 1;
    links
        .iter()
        .enumerate()
        .map(|(i, link)| render_item(i, link, numbered))
        .collect()
}

/// Full notification: header, one line per link, footer
pub fn render_message(watcher_name: &str, source_url: &str, links: &[Link]) -> String {
    format!(
        "{}{}{}",
        header(watcher_name),
        render_body(links),
        footer(source_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_link_is_not_numbered() {
        let text = render_message(
            "News",
            "https://example.com/news",
            &[Link::new("Hello", "https://example.com/1")],
        );
        assert_eq!(
            text,
            "📣 <b>News</b> 📣\n<a href='https://example.com/1' target='_blank'>Hello</a>\nMore articles: <a href='https://example.com/news'>here</a>"
        );
    }

    #[test]
    fn test_multiple_links_are_numbered() {
        let body = render_body(&[
            Link::new("One", "https://a/1"),
            Link::new("Two", "https://a/2"),
        ]);
        assert_eq!(
            body,
            "1. <a href='https://a/1' target='_blank'>One</a>\n2. <a href='https://a/2' target='_blank'>Two</a>"
        );
    }

    #[test]
    fn test_footer_strips_json_suffix() {
        assert_eq!(
            display_url("https://api.example.com/posts.json?limit=5"),
            "https://api.example.com/posts"
        );
        assert_eq!(display_url("https://example.com/page"), "https://example.com/page");
        assert!(footer("https://r.com/new.json").contains("href='https://r.com/new'"));
    }

    #[test]
    fn test_markup_is_escaped() {
        let item = render_item(0, &Link::new("Q&A <live>", "https://a/?x=1&y='2'"), false);
        assert_eq!(
            item,
            "<a href='https://a/?x=1&amp;y=&#39;2&#39;' target='_blank'>Q&amp;A &lt;live&gt;</a>"
        );
    }

    #[test]
    fn test_rendered_len_counts_chars() {
        assert_eq!(rendered_len("ultimă"), 6);
        assert_eq!(rendered_len(&header("x")), 13);
    }
}
