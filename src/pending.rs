use crate::message::{render_item, rendered_len};
use crate::watcher::Link;

/// Result of folding new links into the pending queue
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Accumulation {
    /// The new pending queue, newest first
    pub kept: Vec<Link>,
    /// Items cut from the tail to respect the size limit
    pub dropped: usize,
}

/// Prepend `new_links` to `pending` and keep the longest prefix whose rendered
/// form fits in `size_limit` alongside `header` and `footer`.
///
/// Items are always sized as numbered lines. The first item that does not fit
/// ends the walk; nothing after it is kept even if it would fit on its own.
pub fn accumulate(
    new_links: &[Link],
    pending: &[Link],
    header: &str,
    footer: &str,
    size_limit: usize,
) -> Accumulation {
    let budget = size_limit.saturating_sub(rendered_len(header) + rendered_len(footer));
    let total = new_links.len() + pending.len();

    let mut kept: Vec<Link> = Vec::new();
    let mut used = 0;
    for link in new_links.iter().chain(pending) {
        let len = rendered_len(&render_item(kept.len(), link, true));
        if used + len > budget {
            break;
        }
        used += len;
        kept.push(link.clone());
    }

    Accumulation {
        dropped: total - kept.len(),
        kept,
    }
}

/// Rendered length of a pending queue's item lines, separators included
pub fn rendered_items_len(links: &[Link]) -> usize {
    links
        .iter()
        .enumerate()
        .map(|(i, link)| rendered_len(&render_item(i, link, true)))
        .sum()
}
