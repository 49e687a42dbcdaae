use scraper::{ElementRef, Html};
use serde_json::Value;
use url::Url;

use crate::error::{LookoutError, Result};
use crate::fetch::Document;
use crate::watcher::{
    ApiSelector, FieldPath, Link, Selector, SourceType, WatcherConfig, WebSelector,
};

/// Extract the ordered link list (newest first, as the source presents it)
pub fn extract(watcher: &WatcherConfig, document: &Document) -> Result<Vec<Link>> {
    match (&watcher.selector, document) {
        (Selector::Api(selector), Document::Json(value)) => extract_api(value, selector),
        (Selector::Web(selector), Document::Html { url, body }) => {
            extract_web(body, url, selector)
        }
        (selector, _) => {
            let kind = match selector.source_type() {
                SourceType::Api => "JSON",
                SourceType::Web => "HTML",
            };
            Err(LookoutError::Extraction(format!(
                "selector expects a {} document",
                kind
            )))
        }
    }
}

/// Navigate the list path, then read title and url from every element.
/// A missing key anywhere fails the whole extraction.
pub fn extract_api(document: &Value, selector: &ApiSelector) -> Result<Vec<Link>> {
    let list = navigate(document, &selector.list)?;
    let items = list.as_array().ok_or_else(|| {
        LookoutError::Extraction(format!("'{}' is not a list", selector.list))
    })?;

    if items.is_empty() {
        return Err(LookoutError::NoElementsFound(format!(
            "list '{}' is empty",
            selector.list
        )));
    }

    items
        .iter()
        .map(|item| {
            let title = scalar(navigate(item, &selector.title)?, &selector.title)?;
            let url = scalar(navigate(item, &selector.url)?, &selector.url)?;
            Ok(Link::new(title, url))
        })
        .collect()
}

fn navigate<'a>(value: &'a Value, path: &FieldPath) -> Result<&'a Value> {
    path.segments().iter().try_fold(value, |current, segment| {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        next.ok_or_else(|| {
            LookoutError::Extraction(format!("missing key '{}' in path '{}'", segment, path))
        })
    })
}

fn scalar(value: &Value, path: &FieldPath) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(LookoutError::Extraction(format!(
            "value at '{}' is not a string",
            path
        ))),
    }
}

/// Query the page and turn each match into a link.
/// Matches with no usable title or no href are skipped.
pub fn extract_web(html: &str, base_url: &str, selector: &WebSelector) -> Result<Vec<Link>> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url)?;

    let mut matched = 0;
    let mut links = Vec::new();
    for element in document.select(selector.query()) {
        matched += 1;
        let Some(title) = element_title(&element) else {
            continue;
        };
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(url) = resolve_url(&base, href.trim()) {
            links.push(Link::new(title, url));
        }
    }

    if matched == 0 {
        return Err(LookoutError::NoElementsFound(format!(
            "selector '{}' matched no elements",
            selector
        )));
    }

    Ok(links)
}

/// Own text, then the `title` attribute, then `aria-label`
fn element_title(element: &ElementRef) -> Option<String> {
    let text = element.text().collect::<String>();
    let text = text.trim();
    if !text.is_empty() {
        return Some(text.to_string());
    }

    ["title", "aria-label"]
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(String::from)
}

/// Resolve a potentially relative URL against the page URL
fn resolve_url(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}
