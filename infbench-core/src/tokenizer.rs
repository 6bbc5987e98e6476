use std::collections::HashMap;
use std::sync::Mutex;

/// Tokenization collaborator. The engine only needs token counts and the
/// ability to slice a pre-tokenized corpus; the vocabulary itself is opaque
/// and may be nondeterministic across configurations.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn decode(&self, ids: &[u32]) -> String;

    fn count_tokens(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Whitespace tokenizer: one token per whitespace-separated word, with ids
/// assigned on first sight. Decoding joins words with single spaces, so
/// `count_tokens(decode(&ids[..n])) == n` holds for any corpus slice.
#[derive(Debug, Default)]
pub struct WhitespaceTokenizer {
    vocab: Mutex<Vocab>,
}

#[derive(Debug, Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    words: Vec<String>,
}

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut vocab = self
            .vocab
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        text.split_whitespace()
            .map(|word| {
                if let Some(&id) = vocab.ids.get(word) {
                    id
                } else {
                    let id = vocab.words.len() as u32;
                    vocab.ids.insert(word.to_string(), id);
                    vocab.words.push(word.to_string());
                    id
                }
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        let vocab = self
            .vocab
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut out = String::new();
        for &id in ids {
            if let Some(word) = vocab.words.get(id as usize) {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(word);
            }
        }
        out
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_words() {
        let tok = WhitespaceTokenizer::new();
        let ids = tok.encode("the quick brown fox the fox");
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], ids[4], "repeated word keeps its id");
        assert_eq!(tok.decode(&ids), "the quick brown fox the fox");
    }

    #[test]
    fn prefix_slices_have_exact_token_counts() {
        let tok = WhitespaceTokenizer::new();
        let ids = tok.encode("a b c d e f g h");
        for n in 1..=ids.len() {
            let text = tok.decode(&ids[..n]);
            assert_eq!(tok.count_tokens(&text), n);
        }
    }
}
