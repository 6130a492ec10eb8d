#![no_main]

use arbitrary::Arbitrary;
use casefind::query::parse_query;
use casefind::query::snippet::build_snippets;
use casefind::utils::segment;
use libfuzzer_sys::fuzz_target;
use std::ops::Range;

#[derive(Debug, Arbitrary)]
struct Input {
    text: String,
    query: String,
    radius: u8,
}

fuzz_target!(|input: Input| {
    let query = parse_query(&input.query);
    let tokens = segment(&input.text);

    let occurrences: Vec<Range<usize>> = tokens
        .iter()
        .filter(|t| query.terms.contains(&t.term))
        .map(|t| t.offset..t.end())
        .collect();
    let anchors: Vec<Range<usize>> = query
        .terms
        .iter()
        .filter_map(|term| tokens.iter().find(|t| &t.term == term))
        .map(|t| t.offset..t.end())
        .collect();

    for snippet in build_snippets(&input.text, &anchors, &occurrences, input.radius as usize) {
        let _ = snippet.marked("[", "]");
        let _ = snippet.fragments();
    }
});
