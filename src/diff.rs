use crate::watcher::Link;

/// Most links a single cycle reports as new
pub const MAX_NEW_LINKS: usize = 5;

/// Compute which of `results` (newest first) are new relative to `anchor`.
///
/// - no anchor: the first `limit` results (cold start)
/// - anchor found with the same title at `i`: results `[0, i)`
/// - anchor found with an edited title at `i`: results `[0, i]`, so the edit is reported once
/// - anchor not found: every result, capped at `limit`
pub fn new_links(results: &[Link], anchor: Option<&Link>, limit: usize) -> Vec<Link> {
    let end = match anchor {
        None => results.len(),
        Some(anchor) => match results.iter().position(|link| link.url == anchor.url) {
            Some(i) if results[i].title != anchor.title => i + 1,
            Some(i) => i,
            None => results.len(),
        },
    };

    results[..end].iter().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Vec<Link> {
        (0..n)
            .map(|i| Link::new(format!("Story {}", i), format!("https://example.com/{}", i)))
            .collect()
    }

    #[test]
    fn test_cold_start() {
        assert_eq!(new_links(&links(7), None, MAX_NEW_LINKS), links(5));
        assert_eq!(new_links(&links(3), None, MAX_NEW_LINKS), links(3));
        assert!(new_links(&[], None, MAX_NEW_LINKS).is_empty());
    }

    #[test]
    fn test_anchor_unchanged_is_exclusive() {
        let results = links(6);
        let anchor = results[3].clone();
        assert_eq!(new_links(&results, Some(&anchor), MAX_NEW_LINKS), links(3));
    }

    #[test]
    fn test_anchor_at_top_means_nothing_new() {
        let results = links(4);
        let anchor = results[0].clone();
        assert!(new_links(&results, Some(&anchor), MAX_NEW_LINKS).is_empty());
    }

    #[test]
    fn test_anchor_with_edited_title_is_inclusive() {
        let results = links(6);
        let anchor = Link::new("Old headline", results[2].url.clone());
        assert_eq!(new_links(&results, Some(&anchor), MAX_NEW_LINKS), links(3));
    }

    #[test]
    fn test_anchor_missing_returns_everything_capped() {
        let anchor = Link::new("Gone", "https://example.com/gone");
        assert_eq!(new_links(&links(8), Some(&anchor), MAX_NEW_LINKS), links(5));
        assert_eq!(new_links(&links(2), Some(&anchor), MAX_NEW_LINKS), links(2));
    }

    #[test]
    fn test_cap_applies_to_found_anchor() {
        let results = links(9);
        let anchor = results[8].clone();
        assert_eq!(new_links(&results, Some(&anchor), MAX_NEW_LINKS), links(5));
    }
}
