// src/ingest/merge.rs
//! Merge & dedup: pure functions over item lists, no I/O.

use std::collections::HashSet;

use crate::model::TimelineItem;

/// Combine `existing` with `incoming`, newest first, dropping any item whose
/// id or url was already seen earlier in that order, then keep at most
/// `max_retained`.
///
/// The sort is stable, so on equal dates existing items come before incoming
/// ones and keep their place.
pub fn merge(
    existing: Vec<TimelineItem>,
    incoming: Vec<TimelineItem>,
    max_retained: usize,
) -> Vec<TimelineItem> {
    let mut all: Vec<TimelineItem> = existing
        .into_iter()
        .chain(incoming)
        .filter(TimelineItem::is_valid)
        .collect();
    all.sort_by(|a, b| b.date.cmp(&a.date));

    let mut seen_ids: HashSet<String> = HashSet::with_capacity(all.len());
    let mut seen_urls: HashSet<String> = HashSet::with_capacity(all.len());
    let mut out = Vec::with_capacity(all.len().min(max_retained));
    for item in all {
        if out.len() >= max_retained {
            break;
        }
        if seen_ids.contains(&item.id) || seen_urls.contains(&item.url) {
            continue;
        }
        seen_ids.insert(item.id.clone());
        seen_urls.insert(item.url.clone());
        out.push(item);
    }
    out
}

/// How many incoming items are neither in `existing` (by id or url) nor
/// repeats within `incoming` itself.
pub fn count_new(existing: &[TimelineItem], incoming: &[TimelineItem]) -> usize {
    let mut ids: HashSet<&str> = existing.iter().map(|i| i.id.as_str()).collect();
    let mut urls: HashSet<&str> = existing.iter().map(|i| i.url.as_str()).collect();
    incoming
        .iter()
        .filter(|i| {
            let fresh = !ids.contains(i.id.as_str()) && !urls.contains(i.url.as_str());
            ids.insert(i.id.as_str());
            urls.insert(i.url.as_str());
            fresh
        })
        .count()
}

/// Seeds only exist to keep a feed non-empty; drop them once anything real
/// is available.
pub fn drop_seeds_if_real(items: Vec<TimelineItem>) -> Vec<TimelineItem> {
    if items.iter().any(|i| !i.is_seed()) {
        items.into_iter().filter(|i| !i.is_seed()).collect()
    } else {
        items
    }
}
