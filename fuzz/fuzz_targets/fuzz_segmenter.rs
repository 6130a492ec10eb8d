#![no_main]

use casefind::utils::segmenter::occurrence_len;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Every token must point at a real span of the input
    for token in casefind::utils::segment(data) {
        assert!(!token.term.is_empty());
        assert!(token.end() <= data.len());
        assert!(data.is_char_boundary(token.offset));
        assert!(data.is_char_boundary(token.end()));
        assert!(occurrence_len(data, token.offset, &token.term).is_some());
    }

    let _ = casefind::query::parse_query(data);
});
