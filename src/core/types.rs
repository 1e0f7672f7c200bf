// src/core/types.rs
use serde::Serialize;
use thiserror::Error;

/// A single ranked suggestion returned by the trie and n-gram engines.
/// `score` is the raw frequency for trie and completion results, and
/// frequency + 1000 for boosted bigram hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub word: String,
    pub score: i32,
}

impl Suggestion {
    pub fn new(word: impl Into<String>, score: i32) -> Self {
        Self {
            word: word.into(),
            score,
        }
    }
}

/// Failure modes shared by all three loaders. A failed load leaves the
/// engine in whatever partial state it reached; callers should discard it,
/// except for `Truncated`, where every fully-parsed entry is retained and a
/// host may elect to continue with the partial data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("buffer truncated: need {need} bytes at offset {offset}, have {have}")]
    Truncated {
        offset: usize,
        need: usize,
        have: usize,
    },
    #[error("bad magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("malformed input: {0}")]
    Malformed(&'static str),
    #[error("no entries parsed")]
    NoEntries,
    #[error("i/o failure: {0:?}")]
    Io(std::io::ErrorKind),
}
