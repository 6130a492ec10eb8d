//! Mixed-script text segmentation.
//!
//! Latin (and other alphabetic) text is split into lowercased words. Runs of
//! Han characters have no word boundaries to split on, so every character is
//! emitted as a 1-gram and every adjacent pair as an overlapping 2-gram. A query
//! segmented the same way then matches any substring of one or two characters
//! and any longer phrase through the intersection of its 2-grams.
//!
//! ```
//! use casefind::utils::segment;
//!
//! let terms: Vec<String> = segment("登录Login").into_iter().map(|t| t.term).collect();
//! assert_eq!(terms, ["登", "登录", "录", "login"]);
//! ```

/// A term produced by [`segment`], anchored in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized term (lowercased word or Han n-gram)
    pub term: String,
    /// Byte offset of the first source character
    pub offset: usize,
    /// Byte length of the source span (may differ from `term.len()` after lowercasing)
    pub len: usize,
}

impl Token {
    /// Byte offset one past the end of the source span
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Han,
    Word,
    Other,
}

fn classify(c: char) -> CharClass {
    if is_han(c) {
        CharClass::Han
    } else if c.is_alphanumeric() {
        CharClass::Word
    } else {
        CharClass::Other
    }
}

/// Check whether a character is a Han ideograph (unified, extension or compatibility blocks)
pub fn is_han(c: char) -> bool {
    matches!(
        c as u32,
        0x4E00..=0x9FFF         // CJK Unified Ideographs
            | 0x3400..=0x4DBF   // Extension A
            | 0x20000..=0x2A6DF // Extension B
            | 0x2A700..=0x2EBEF // Extensions C to F
            | 0x30000..=0x3134F // Extension G
            | 0xF900..=0xFAFF   // Compatibility Ideographs
            | 0x2F800..=0x2FA1F // Compatibility Ideographs Supplement
            | 0x3007            // 〇
    )
}

/// Segment text into terms ordered by offset.
///
/// For Han runs the 1-gram at a position precedes the 2-gram starting there.
/// Punctuation, whitespace and symbols only separate terms.
pub fn segment(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match classify(c) {
            CharClass::Other => {
                chars.next();
            }
            CharClass::Word => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if classify(c) != CharClass::Word {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let run = &text[start..end];
                tokens.push(Token {
                    term: run.to_lowercase(),
                    offset: start,
                    len: end - start,
                });
            }
            CharClass::Han => {
                let mut run: Vec<(usize, char)> = Vec::new();
                while let Some(&(i, c)) = chars.peek() {
                    if classify(c) != CharClass::Han {
                        break;
                    }
                    run.push((i, c));
                    chars.next();
                }
                push_han_grams(&run, &mut tokens);
            }
        }
    }

    tokens
}

fn push_han_grams(run: &[(usize, char)], tokens: &mut Vec<Token>) {
    for (i, &(offset, c)) in run.iter().enumerate() {
        tokens.push(Token {
            term: c.to_string(),
            offset,
            len: c.len_utf8(),
        });

        if let Some(&(_, next)) = run.get(i + 1) {
            let mut bigram = String::with_capacity(c.len_utf8() + next.len_utf8());
            bigram.push(c);
            bigram.push(next);
            tokens.push(Token {
                len: bigram.len(),
                term: bigram,
                offset,
            });
        }
    }
}

/// Length in bytes of the source span of `term` occurring at `offset`.
///
/// Han n-grams are stored verbatim so their span is the term itself. Words may
/// change length when lowercased, so the word run at `offset` is rescanned.
/// Returns `None` if `offset` is not a character boundary of `text`.
pub fn occurrence_len(text: &str, offset: usize, term: &str) -> Option<usize> {
    let rest = text.get(offset..)?;
    let first = rest.chars().next()?;

    if is_han(first) {
        return Some(term.len().min(rest.len()));
    }

    let len = rest
        .char_indices()
        .find(|&(_, c)| classify(c) != CharClass::Word)
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(text: &str) -> Vec<String> {
        segment(text).into_iter().map(|t| t.term).collect()
    }

    #[test]
    fn test_latin_words_lowercased() {
        assert_eq!(terms("Login test-case, OK!"), ["login", "test", "case", "ok"]);
    }

    #[test]
    fn test_word_offsets() {
        let tokens = segment("  Hello world");
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[0].len, 5);
        assert_eq!(tokens[1].offset, 8);
    }

    #[test]
    fn test_han_unigrams_and_bigrams() {
        let tokens = terms("测试用例");
        assert_eq!(tokens, ["测", "测试", "试", "试用", "用", "用例", "例"]);
    }

    #[test]
    fn test_han_offsets() {
        let tokens = segment("a测试");
        // "a" is one byte, each Han char three
        assert_eq!(tokens[1].term, "测");
        assert_eq!(tokens[1].offset, 1);
        assert_eq!(tokens[2].term, "测试");
        assert_eq!(tokens[2].offset, 1);
        assert_eq!(tokens[2].len, 6);
        assert_eq!(tokens[3].offset, 4);
    }

    #[test]
    fn test_script_boundary_splits_runs() {
        assert_eq!(terms("用户Admin登录"), ["用", "用户", "户", "admin", "登", "登录", "录"]);
    }

    #[test]
    fn test_extension_and_compatibility_ideographs() {
        for c in ['\u{2A700}', '\u{2EBE0}', '\u{30000}', '\u{2F800}', '〇'] {
            assert!(is_han(c), "{c:?}");
        }
        assert!(!is_han('a'));
        assert!(!is_han('。'));
        assert_eq!(
            terms("\u{2A700}〇x"),
            ["\u{2A700}", "\u{2A700}〇", "〇", "x"]
        );
    }

    #[test]
    fn test_single_han_char() {
        assert_eq!(terms("，例。"), ["例"]);
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        assert!(segment("").is_empty());
        assert!(segment("   \n\t").is_empty());
        assert!(segment("--- ## ...").is_empty());
    }

    #[test]
    fn test_digits_are_word_chars() {
        assert_eq!(terms("step 2a: v1.0"), ["step", "2a", "v1", "0"]);
    }

    #[test]
    fn test_occurrence_len_for_lowercased_word() {
        let text = "see ÅNGSTRÖM now";
        let tokens = segment(text);
        let word = &tokens[1];
        assert_eq!(occurrence_len(text, word.offset, &word.term), Some(word.len));
    }

    #[test]
    fn test_occurrence_len_han() {
        let text = "测试用例";
        assert_eq!(occurrence_len(text, 3, "试用"), Some(6));
        assert_eq!(occurrence_len(text, 1, "试"), None);
    }

    #[test]
    fn test_deterministic() {
        let text = "混合 Mixed 文本 text 123";
        assert_eq!(segment(text), segment(text));
    }
}
