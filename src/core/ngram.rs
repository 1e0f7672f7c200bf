// File: src/core/ngram.rs
//
// Word-level unigram/bigram engine. Both assets share one header (magic
// "NGRM", version 1, u32 entry count, little-endian throughout):
//
//   vocabulary entry: u16 word length, raw bytes, u16 frequency
//   bigram entry:     u16 first-word index, u16 second-word index, u16 freq
//
// Words take indices 0..N-1 in file order. Bigrams are bucketed by first
// word and each bucket is sorted by frequency descending at load time, so
// `predict` is a map lookup plus a prefix of the bucket.

use crate::core::reader::ByteReader;
use crate::core::types::{LoadError, Suggestion};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const NGRAM_MAGIC: u32 = 0x4E47_524D; // "NGRM"
const NGRAM_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

/// Bigram hits outrank plain completions by this much in `get_suggestions`.
const BIGRAM_BOOST: i32 = 1000;

#[derive(Debug)]
struct WordEntry {
    word: String,
    frequency: u16,
}

#[derive(Debug)]
struct BigramEntry {
    first: u16,
    second: u16,
    frequency: u16,
}

#[derive(Debug, Default)]
pub struct NgramEngine {
    vocabulary: Vec<WordEntry>,
    word_to_index: HashMap<String, u16>,
    bigrams: Vec<BigramEntry>,
    bigrams_by_first: HashMap<u16, Vec<(u16, u16)>>,
    vocabulary_loaded: bool,
    bigrams_loaded: bool,
}

impl NgramEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the word table. A truncated buffer yields `Truncated` while
    /// keeping every fully-parsed entry, so a host may elect to continue
    /// with the partial vocabulary.
    pub fn load_vocabulary(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let mut r = self.checked_header(data)?;
        let count = r.read_u32()? as usize;
        // Word indices are 16-bit on the wire.
        if count > u16::MAX as usize + 1 {
            return Err(LoadError::Malformed("word count exceeds 16-bit index space"));
        }

        self.vocabulary.clear();
        self.word_to_index.clear();

        let mut truncation = None;
        for i in 0..count {
            match read_word_entry(&mut r) {
                Ok((word, frequency)) => {
                    self.word_to_index.insert(word.clone(), i as u16);
                    self.vocabulary.push(WordEntry { word, frequency });
                }
                Err(e) => {
                    warn!(parsed = i, expected = count, "vocabulary buffer ends early");
                    truncation = Some(e);
                    break;
                }
            }
        }

        self.vocabulary_loaded = !self.vocabulary.is_empty();
        if self.vocabulary.is_empty() {
            return Err(LoadError::NoEntries);
        }
        if let Some(e) = truncation {
            return Err(e);
        }
        info!(words = self.vocabulary.len(), "ngram vocabulary loaded");
        Ok(())
    }

    /// Parses the bigram table and builds the per-first-word buckets.
    /// Truncation behaves as in `load_vocabulary`.
    pub fn load_bigrams(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let mut r = self.checked_header(data)?;
        let count = r.read_u32()? as usize;

        self.bigrams.clear();
        self.bigrams_by_first.clear();

        let mut truncation = None;
        for i in 0..count {
            let entry = (|| -> Result<BigramEntry, LoadError> {
                let first = r.read_u16()?;
                let second = r.read_u16()?;
                let frequency = r.read_u16()?;
                Ok(BigramEntry {
                    first,
                    second,
                    frequency,
                })
            })();
            match entry {
                Ok(entry) => {
                    self.bigrams_by_first
                        .entry(entry.first)
                        .or_default()
                        .push((entry.second, entry.frequency));
                    self.bigrams.push(entry);
                }
                Err(e) => {
                    warn!(parsed = i, expected = count, "bigram buffer ends early");
                    truncation = Some(e);
                    break;
                }
            }
        }

        // Stable sort keeps the bucket order a pure function of input order.
        for bucket in self.bigrams_by_first.values_mut() {
            bucket.sort_by(|a, b| b.1.cmp(&a.1));
        }

        self.bigrams_loaded = !self.bigrams.is_empty();
        if self.bigrams.is_empty() {
            return Err(LoadError::NoEntries);
        }
        if let Some(e) = truncation {
            return Err(e);
        }
        info!(bigrams = self.bigrams.len(), "ngram bigrams loaded");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.vocabulary_loaded && self.bigrams_loaded
    }

    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn bigram_count(&self) -> usize {
        self.bigrams.len()
    }

    /// Next-word predictions after `prev_word`, highest frequency first.
    pub fn predict(&self, prev_word: &str, top_k: usize) -> Vec<Suggestion> {
        if !self.is_ready() || prev_word.is_empty() {
            return Vec::new();
        }
        let prev_idx = match self.word_to_index.get(prev_word) {
            Some(&idx) => idx,
            None => return Vec::new(),
        };
        let bucket = match self.bigrams_by_first.get(&prev_idx) {
            Some(bucket) => bucket,
            None => return Vec::new(),
        };

        bucket
            .iter()
            .take(top_k)
            .filter_map(|&(next_idx, frequency)| {
                self.vocabulary
                    .get(next_idx as usize)
                    .map(|entry| Suggestion::new(entry.word.clone(), frequency as i32))
            })
            .collect()
    }

    /// Completions of `prefix` by linear vocabulary scan. `prefix` is
    /// expected to be lowercased already; matching is a plain byte prefix.
    pub fn complete(&self, prefix: &str, top_k: usize) -> Vec<Suggestion> {
        if !self.vocabulary_loaded || prefix.is_empty() {
            return Vec::new();
        }
        let mut matches: Vec<Suggestion> = self
            .vocabulary
            .iter()
            .filter(|entry| entry.word.starts_with(prefix))
            .map(|entry| Suggestion::new(entry.word.clone(), entry.frequency as i32))
            .collect();
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(top_k);
        matches
    }

    /// Merged bigram predictions and prefix completions for the raw editor
    /// text. Bigram hits that survive the current-word filter score
    /// frequency + 1000; completions score plain frequency; each word
    /// appears at most once, with the bigram branch winning.
    pub fn get_suggestions(&self, text: &str, top_k: usize) -> Vec<Suggestion> {
        if !self.is_ready() || text.is_empty() {
            return Vec::new();
        }

        let current_word = extract_current_word(text);
        let prev_word = extract_prev_word(text);

        let mut results = Vec::new();
        let mut seen = HashSet::new();

        if !prev_word.is_empty() {
            for prediction in self.predict(&prev_word, top_k * 2) {
                if !current_word.is_empty() && !prediction.word.starts_with(&current_word) {
                    continue;
                }
                if seen.insert(prediction.word.clone()) {
                    results.push(Suggestion::new(prediction.word, prediction.score + BIGRAM_BOOST));
                }
            }
        }

        if current_word.len() >= 2 {
            for completion in self.complete(&current_word, top_k * 2) {
                if seen.insert(completion.word.clone()) {
                    results.push(completion);
                }
            }
        }

        results.sort_by(|a, b| b.score.cmp(&a.score));
        results.truncate(top_k);
        results
    }

    fn checked_header<'a>(&self, data: &'a [u8]) -> Result<ByteReader<'a>, LoadError> {
        if data.len() < HEADER_LEN {
            return Err(LoadError::Truncated {
                offset: 0,
                need: HEADER_LEN,
                have: data.len(),
            });
        }
        let mut r = ByteReader::new(data);
        let magic = r.read_u32()?;
        if magic != NGRAM_MAGIC {
            return Err(LoadError::BadMagic {
                expected: NGRAM_MAGIC,
                got: magic,
            });
        }
        let version = r.read_u32()?;
        if version != NGRAM_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }
        Ok(r)
    }
}

fn read_word_entry(r: &mut ByteReader<'_>) -> Result<(String, u16), LoadError> {
    let len = r.read_u16()? as usize;
    let bytes = r.read_bytes(len)?;
    let frequency = r.read_u16()?;
    Ok((String::from_utf8_lossy(bytes).into_owned(), frequency))
}

/// The word being typed: everything after the last ASCII space (the whole
/// text when there is none), byte-wise ASCII-lowercased.
fn extract_current_word(text: &str) -> String {
    let word = match text.rfind(' ') {
        Some(pos) => &text[pos + 1..],
        None => text,
    };
    word.to_ascii_lowercase()
}

/// The committed word before the one being typed: bounded by the last two
/// spaces. Empty when there is no space, or when the last space sits at
/// byte 0 so nothing can precede it.
fn extract_prev_word(text: &str) -> String {
    let last_space = match text.rfind(' ') {
        Some(pos) => pos,
        None => return String::new(),
    };
    if last_space == 0 {
        return String::new();
    }
    let before = &text[..last_space];
    let start = match before.rfind(' ') {
        Some(pos) => pos + 1,
        None => 0,
    };
    text[start..last_space].to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab_bytes(entries: &[(&str, u16)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&NGRAM_MAGIC.to_le_bytes());
        buf.extend_from_slice(&NGRAM_VERSION.to_le_bytes());
        buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (word, frequency) in entries {
            buf.extend_from_slice(&(word.len() as u16).to_le_bytes());
            buf.extend_from_slice(word.as_bytes());
            buf.extend_from_slice(&frequency.to_le_bytes());
        }
        buf
    }

    fn bigram_bytes(entries: &[(u16, u16, u16)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&NGRAM_MAGIC.to_le_bytes());
        buf.extend_from_slice(&NGRAM_VERSION.to_le_bytes());
        buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (first, second, frequency) in entries {
            buf.extend_from_slice(&first.to_le_bytes());
            buf.extend_from_slice(&second.to_le_bytes());
            buf.extend_from_slice(&frequency.to_le_bytes());
        }
        buf
    }

    /// the=0, theatre=1, they=2, cat=3 with the single bigram the -> cat.
    fn sample_engine() -> NgramEngine {
        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[
                ("the", 500),
                ("theatre", 80),
                ("they", 300),
                ("cat", 40),
            ]))
            .unwrap();
        engine.load_bigrams(&bigram_bytes(&[(0, 3, 200)])).unwrap();
        engine
    }

    #[test]
    fn bigram_prediction_filtered_by_current_prefix() {
        let engine = sample_engine();
        let result = engine.get_suggestions("the c", 5);
        assert_eq!(result, vec![Suggestion::new("cat", 1200)]);
    }

    #[test]
    fn completions_rank_by_frequency_when_no_bigram_matches() {
        let engine = sample_engine();
        let result = engine.get_suggestions("the th", 5);
        assert_eq!(
            result,
            vec![
                Suggestion::new("the", 500),
                Suggestion::new("they", 300),
                Suggestion::new("theatre", 80),
            ]
        );
    }

    #[test]
    fn bigram_branch_wins_the_dedup() {
        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[("go", 100), ("good", 50)]))
            .unwrap();
        engine.load_bigrams(&bigram_bytes(&[(0, 1, 30)])).unwrap();

        // "good" is both the bigram continuation of "go" and a completion of
        // "goo"; only the boosted bigram entry may survive.
        let result = engine.get_suggestions("go goo", 5);
        assert_eq!(result, vec![Suggestion::new("good", 1030)]);
    }

    #[test]
    fn predict_returns_bucket_prefix_in_frequency_order() {
        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[("a", 10), ("b", 20), ("c", 30), ("d", 40)]))
            .unwrap();
        engine
            .load_bigrams(&bigram_bytes(&[(0, 1, 5), (0, 2, 50), (0, 3, 20), (1, 0, 9)]))
            .unwrap();

        let result = engine.predict("a", 2);
        assert_eq!(
            result,
            vec![Suggestion::new("c", 50), Suggestion::new("d", 20)]
        );
        assert!(engine.predict("zzz", 2).is_empty());
        assert!(engine.predict("", 2).is_empty());
    }

    #[test]
    fn leading_space_means_no_previous_word() {
        let engine = sample_engine();
        // The only space is at byte 0, so the bigram branch must stay off.
        let result = engine.get_suggestions(" the", 5);
        assert_eq!(
            result,
            vec![
                Suggestion::new("the", 500),
                Suggestion::new("they", 300),
                Suggestion::new("theatre", 80),
            ]
        );
    }

    #[test]
    fn text_is_ascii_lowercased_before_lookup() {
        let engine = sample_engine();
        let result = engine.get_suggestions("THE C", 5);
        assert_eq!(result, vec![Suggestion::new("cat", 1200)]);
    }

    #[test]
    fn word_extraction_handles_multiple_spaces() {
        assert_eq!(extract_current_word("foo bar ba"), "ba");
        assert_eq!(extract_prev_word("foo bar ba"), "bar");
        assert_eq!(extract_prev_word("bar ba"), "bar");
        assert_eq!(extract_prev_word("ba"), "");
        assert_eq!(extract_prev_word(" ba"), "");
        assert_eq!(extract_current_word("foo "), "");
        // Consecutive spaces leave an empty previous word.
        assert_eq!(extract_prev_word("a  b"), "");
    }

    #[test]
    fn queries_need_both_tables() {
        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[("the", 500)]))
            .unwrap();
        assert!(!engine.is_ready());
        assert!(engine.get_suggestions("th", 5).is_empty());
        assert!(engine.predict("the", 5).is_empty());
        // complete only needs the vocabulary.
        assert_eq!(engine.complete("th", 5), vec![Suggestion::new("the", 500)]);
    }

    #[test]
    fn truncated_vocabulary_keeps_parsed_entries() {
        let mut full = vocab_bytes(&[("the", 500), ("cat", 40)]);
        // Declare 3 entries but provide 2.
        full[8..12].copy_from_slice(&3u32.to_le_bytes());

        let mut engine = NgramEngine::new();
        let err = engine.load_vocabulary(&full).unwrap_err();
        assert!(matches!(err, LoadError::Truncated { .. }));
        assert_eq!(engine.vocab_size(), 2);
        assert_eq!(engine.complete("th", 5), vec![Suggestion::new("the", 500)]);
    }

    #[test]
    fn truncated_bigrams_keep_parsed_entries() {
        let mut bytes = bigram_bytes(&[(0, 1, 10)]);
        bytes.extend_from_slice(&[0x00, 0x00]); // half an entry
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());

        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[("a", 1), ("b", 2)]))
            .unwrap();
        let err = engine.load_bigrams(&bytes).unwrap_err();
        assert!(matches!(err, LoadError::Truncated { .. }));
        assert_eq!(engine.bigram_count(), 1);
        assert!(engine.is_ready());
        assert_eq!(engine.predict("a", 5), vec![Suggestion::new("b", 10)]);
    }

    #[test]
    fn empty_tables_and_bad_headers_are_errors() {
        let mut engine = NgramEngine::new();
        assert_eq!(
            engine.load_vocabulary(&vocab_bytes(&[])),
            Err(LoadError::NoEntries)
        );
        assert_eq!(
            engine.load_bigrams(&bigram_bytes(&[])),
            Err(LoadError::NoEntries)
        );
        assert!(matches!(
            engine.load_vocabulary(&[0u8; 5]),
            Err(LoadError::Truncated { .. })
        ));

        let mut bad_magic = vocab_bytes(&[("x", 1)]);
        bad_magic[0] ^= 0xFF;
        assert!(matches!(
            engine.load_vocabulary(&bad_magic),
            Err(LoadError::BadMagic { .. })
        ));

        let mut bad_version = vocab_bytes(&[("x", 1)]);
        bad_version[4] = 2;
        assert_eq!(
            engine.load_vocabulary(&bad_version),
            Err(LoadError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn no_word_repeats_in_merged_results() {
        let mut engine = NgramEngine::new();
        engine
            .load_vocabulary(&vocab_bytes(&[("go", 100), ("gone", 60), ("good", 50)]))
            .unwrap();
        engine
            .load_bigrams(&bigram_bytes(&[(0, 1, 40), (0, 2, 30)]))
            .unwrap();

        let result = engine.get_suggestions("go go", 10);
        let mut words: Vec<&str> = result.iter().map(|s| s.word.as_str()).collect();
        words.sort_unstable();
        words.dedup();
        assert_eq!(words.len(), result.len());
    }
}
