//! Highlighted excerpts for search results.
//!
//! Each matched term contributes a window around its first occurrence: up to
//! `radius` bytes of context on either side, never crossing the line the
//! occurrence sits on. Overlapping or touching windows merge. Inside a window
//! every occurrence of any query term is highlighted, and highlight ranges are
//! merged so they never overlap.

use memchr::{memchr, memrchr};
use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub text: String,
    /// Byte offset of `text` in the document
    pub start: usize,
    /// Sorted, non-overlapping byte ranges of `text` to highlight
    pub highlights: Vec<Range<usize>>,
}

impl Snippet {
    /// Split the text into (fragment, highlighted) runs
    pub fn fragments(&self) -> Vec<(&str, bool)> {
        let mut out = Vec::with_capacity(self.highlights.len() * 2 + 1);
        let mut pos = 0;
        for range in &self.highlights {
            if range.start > pos {
                out.push((&self.text[pos..range.start], false));
            }
            out.push((&self.text[range.clone()], true));
            pos = range.end;
        }
        if pos < self.text.len() {
            out.push((&self.text[pos..], false));
        }
        out
    }

    /// Render with highlights wrapped in markers, e.g. `<mark>` and `</mark>`
    pub fn marked(&self, open: &str, close: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + self.highlights.len() * (open.len() + close.len()));
        for (fragment, highlighted) in self.fragments() {
            if highlighted {
                out.push_str(open);
                out.push_str(fragment);
                out.push_str(close);
            } else {
                out.push_str(fragment);
            }
        }
        out
    }
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Window of context around `anchor`, clamped to its line
fn window(text: &str, anchor: &Range<usize>, radius: usize) -> Range<usize> {
    let bytes = text.as_bytes();
    let line_start = memrchr(b'\n', &bytes[..anchor.start]).map_or(0, |i| i + 1);
    let mut line_end = memchr(b'\n', &bytes[anchor.end..]).map_or(bytes.len(), |i| anchor.end + i);
    if line_end > anchor.end && bytes[line_end - 1] == b'\r' {
        line_end -= 1;
    }

    let lo = floor_boundary(text, anchor.start.saturating_sub(radius)).max(line_start);
    let hi = ceil_boundary(text, anchor.end.saturating_add(radius)).min(line_end);
    lo..hi
}

/// Merge sorted ranges that overlap or touch
fn merge(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.sort_by_key(|r| (r.start, r.end));
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Build snippets for one document.
///
/// `anchors` are the first occurrence of each matched term, `occurrences`
/// every occurrence of every query term. All ranges are byte ranges on
/// character boundaries of `text`.
pub fn build_snippets(
    text: &str,
    anchors: &[Range<usize>],
    occurrences: &[Range<usize>],
    radius: usize,
) -> Vec<Snippet> {
    let valid = |r: &&Range<usize>| {
        r.start < r.end && r.end <= text.len() && text.is_char_boundary(r.start) && text.is_char_boundary(r.end)
    };

    let windows = merge(
        anchors
            .iter()
            .filter(valid)
            .map(|anchor| window(text, anchor, radius))
            .collect(),
    );

    let occurrences: Vec<&Range<usize>> = occurrences.iter().filter(valid).collect();

    windows
        .into_iter()
        .map(|win| {
            let highlights = merge(
                occurrences
                    .iter()
                    .filter(|r| r.start >= win.start && r.end <= win.end)
                    .map(|r| (r.start - win.start)..(r.end - win.start))
                    .collect(),
            );
            Snippet {
                text: text[win.clone()].to_string(),
                start: win.start,
                highlights,
            }
        })
        .collect()
}
