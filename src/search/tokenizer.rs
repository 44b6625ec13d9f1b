use tantivy::tokenizer::{RemoveLongFilter, TextAnalyzer, Token, TokenStream, Tokenizer};

/// Tokens longer than this (in bytes) are dropped; they are almost always
/// pasted hashes or data URIs rather than words.
pub const MAX_TOKEN_LEN: usize = 40;

/// CJK-aware tokenizer: alphanumeric runs become lowercased word tokens,
/// every CJK character becomes its own token plus a bigram with the next
/// CJK character. Everything else is a delimiter.
#[derive(Clone, Default)]
pub struct JournalTokenizer;

impl Tokenizer for JournalTokenizer {
    type TokenStream<'a> = JournalTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let (start, ch) = chars[i];

            if is_cjk_char(ch) {
                let end = start + ch.len_utf8();
                tokens.push(TokenData {
                    text: ch.to_lowercase().collect(),
                    offset_from: start,
                    offset_to: end,
                });
                if let Some(&(next_start, next)) = chars.get(i + 1) {
                    if is_cjk_char(next) {
                        tokens.push(TokenData {
                            text: text[start..next_start + next.len_utf8()].to_lowercase(),
                            offset_from: start,
                            offset_to: next_start + next.len_utf8(),
                        });
                    }
                }
                i += 1;
            } else if ch.is_alphanumeric() {
                let mut end = start;
                while i < chars.len() && chars[i].1.is_alphanumeric() && !is_cjk_char(chars[i].1) {
                    end = chars[i].0 + chars[i].1.len_utf8();
                    i += 1;
                }
                tokens.push(TokenData {
                    text: text[start..end].to_lowercase(),
                    offset_from: start,
                    offset_to: end,
                });
            } else {
                i += 1;
            }
        }

        JournalTokenStream {
            tokens,
            index: 0,
            token: Token::default(),
        }
    }
}

pub fn is_cjk_char(c: char) -> bool {
    let cp = c as u32;
    // CJK Unified Ideographs
    (0x4E00..=0x9FFF).contains(&cp)
    // Hangul Syllables
    || (0xAC00..=0xD7AF).contains(&cp)
    // Hangul Jamo
    || (0x1100..=0x11FF).contains(&cp)
    // Hangul Compatibility Jamo
    || (0x3130..=0x318F).contains(&cp)
    // Katakana
    || (0x30A0..=0x30FF).contains(&cp)
    // Hiragana
    || (0x3040..=0x309F).contains(&cp)
    // CJK Extension A
    || (0x3400..=0x4DBF).contains(&cp)
    // CJK Extension B
    || (0x20000..=0x2A6DF).contains(&cp)
}

struct TokenData {
    text: String,
    offset_from: usize,
    offset_to: usize,
}

pub struct JournalTokenStream {
    tokens: Vec<TokenData>,
    index: usize,
    token: Token,
}

impl TokenStream for JournalTokenStream {
    fn advance(&mut self) -> bool {
        if self.index < self.tokens.len() {
            let data = &self.tokens[self.index];
            self.token = Token {
                offset_from: data.offset_from,
                offset_to: data.offset_to,
                position: self.index,
                text: data.text.clone(),
                position_length: 1,
            };
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(JournalTokenizer)
        // tantivy drops tokens whose length reaches the limit
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN + 1))
        .build()
}

/// All tokens of `text`, in order, duplicates included.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut out = Vec::new();
    while stream.advance() {
        out.push(stream.token().text.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_whitespace_and_punctuation() {
        assert_eq!(
            tokenize("Hello, World! it's-fine"),
            vec!["hello", "world", "it", "s", "fine"]
        );
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(tokenize("MiXeD"), tokenize("mixed"));
    }

    #[test]
    fn test_cjk_unigrams_and_bigrams() {
        assert_eq!(tokenize("일기"), vec!["일", "일기", "기"]);
    }

    #[test]
    fn test_drops_overlong_tokens() {
        let long = "a".repeat(MAX_TOKEN_LEN + 5);
        assert_eq!(tokenize(&format!("short {}", long)), vec!["short"]);
    }

    #[test]
    fn test_keeps_tokens_at_the_length_limit() {
        let exact = "a".repeat(MAX_TOKEN_LEN);
        assert_eq!(tokenize(&exact), vec![exact.clone()]);
        assert!(tokenize(&"a".repeat(MAX_TOKEN_LEN + 1)).is_empty());
    }

    #[test]
    fn test_empty_text_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" \n\t ...").is_empty());
    }
}
