// File: src/core/trie.rs
//
// Compressed radix trie over tokenized Myanmar syllables. The container is
// a CRC-validated little-endian blob:
//
//   magic "MPT1" | version = 2 | string_count | node_count
//   strings:  u32 length + raw UTF-8 bytes, in token-ID order
//   nodes:    u32 label length, label token IDs, i32 frequency (-1 =
//             internal), u32 child count, (u32 first-token, u32 node index)
//             pairs
//   crc32 over everything above
//
// Node 0 is the root with an empty label. Queries tokenize each syllable
// into its leading codepoint plus (when the string table knows it) the
// remaining tail, walk the edge labels, and enumerate the reached subtree.

use crate::core::reader::ByteReader;
use crate::core::types::{LoadError, Suggestion};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

const TRIE_MAGIC: u32 = 0x3154_504D; // "MPT1"
const TRIE_VERSION: u32 = 2;
const MIN_CONTAINER_LEN: usize = 20; // header + trailing CRC

#[derive(Debug, Default)]
struct Node {
    label: Vec<u32>,
    frequency: i32,
    children: Vec<(u32, u32)>, // (first token of child label, child node index)
    child_index: HashMap<u32, u32>,
}

#[derive(Debug, Default)]
pub struct Trie {
    strings: Vec<String>,
    string_to_id: HashMap<String, u32>,
    nodes: Vec<Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses a trie container from disk.
    pub fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        let buf = fs::read(path).map_err(|e| LoadError::Io(e.kind()))?;
        self.load_from_memory(&buf)
    }

    /// Parses a trie container. The CRC is verified before anything else is
    /// looked at, so a single flipped byte anywhere rejects the whole blob.
    pub fn load_from_memory(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if data.len() < MIN_CONTAINER_LEN {
            return Err(LoadError::Truncated {
                offset: 0,
                need: MIN_CONTAINER_LEN,
                have: data.len(),
            });
        }

        let payload_len = data.len() - 4;
        let stored_crc = u32::from_le_bytes([
            data[payload_len],
            data[payload_len + 1],
            data[payload_len + 2],
            data[payload_len + 3],
        ]);
        let computed_crc = crc32fast::hash(&data[..payload_len]);
        if stored_crc != computed_crc {
            return Err(LoadError::ChecksumMismatch {
                stored: stored_crc,
                computed: computed_crc,
            });
        }

        let mut r = ByteReader::new(&data[..payload_len]);
        let magic = r.read_u32()?;
        if magic != TRIE_MAGIC {
            return Err(LoadError::BadMagic {
                expected: TRIE_MAGIC,
                got: magic,
            });
        }
        let version = r.read_u32()?;
        if version != TRIE_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let string_count = r.read_u32()? as usize;
        let node_count = r.read_u32()? as usize;
        // Every string costs at least 4 bytes and every node at least 12;
        // reject counts the payload cannot possibly hold before allocating.
        if string_count > r.remaining() / 4 || node_count > r.remaining() / 12 {
            return Err(LoadError::Malformed("entry counts exceed payload"));
        }

        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            let len = r.read_u32()? as usize;
            let bytes = r.read_bytes(len)?;
            strings.push(String::from_utf8_lossy(bytes).into_owned());
        }
        let mut string_to_id = HashMap::with_capacity(strings.len());
        for (id, s) in strings.iter().enumerate() {
            string_to_id.insert(s.clone(), id as u32);
        }

        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let label_len = r.read_u32()? as usize;
            if label_len > r.remaining() / 4 {
                return Err(LoadError::Malformed("label length exceeds payload"));
            }
            let mut label = Vec::with_capacity(label_len);
            for _ in 0..label_len {
                label.push(r.read_u32()?);
            }
            let frequency = r.read_i32()?;

            let child_count = r.read_u32()? as usize;
            if child_count > r.remaining() / 8 {
                return Err(LoadError::Malformed("child count exceeds payload"));
            }
            let mut children = Vec::with_capacity(child_count);
            let mut child_index = HashMap::with_capacity(child_count);
            for _ in 0..child_count {
                let token = r.read_u32()?;
                let child = r.read_u32()?;
                if child as usize >= node_count {
                    return Err(LoadError::Malformed("child node index out of range"));
                }
                children.push((token, child));
                child_index.insert(token, child);
            }

            nodes.push(Node {
                label,
                frequency,
                children,
                child_index,
            });
        }

        self.strings = strings;
        self.string_to_id = string_to_id;
        self.nodes = nodes;
        info!(
            strings = self.strings.len(),
            nodes = self.nodes.len(),
            "trie loaded"
        );
        Ok(())
    }

    /// Frequency-ranked completions of a partially-typed syllable sequence.
    /// Returns at most `top_k` suggestions, frequencies non-increasing.
    pub fn suggest_partial<S: AsRef<str>>(&self, syllables: &[S], top_k: usize) -> Vec<Suggestion> {
        if self.nodes.is_empty() || self.strings.is_empty() {
            return Vec::new();
        }
        let tokens = self.syllables_to_tokens(syllables);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut node_idx = 0usize;
        let mut path: Vec<u32> = Vec::new();
        let mut offset = 0usize;

        while offset < tokens.len() {
            let node = &self.nodes[node_idx];
            let child_idx = match node.child_index.get(&tokens[offset]) {
                Some(&idx) => idx as usize,
                None => return Vec::new(),
            };
            let child = &self.nodes[child_idx];
            let common = common_prefix_len(&tokens, offset, &child.label);
            if common == 0 {
                return Vec::new();
            }

            if common < child.label.len() {
                if offset + common == tokens.len() {
                    // Key exhausted mid-edge: the first `common` label tokens
                    // are part of the typed prefix, the rest belong to the
                    // completions.
                    path.extend_from_slice(&child.label[..common]);
                    let mut matches = Vec::new();
                    self.collect(child_idx, path, common, &mut matches);
                    return rank(matches, top_k);
                }
                return Vec::new();
            }

            path.extend_from_slice(&child.label);
            offset += common;
            node_idx = child_idx;
        }

        let skip = self.nodes[node_idx].label.len();
        let mut matches = Vec::new();
        self.collect(node_idx, path, skip, &mut matches);
        rank(matches, top_k)
    }

    /// Maps each syllable to (leading codepoint, remainder) token IDs. A
    /// syllable whose leading codepoint is unknown is skipped entirely; an
    /// unknown remainder is silently dropped.
    fn syllables_to_tokens<S: AsRef<str>>(&self, syllables: &[S]) -> Vec<u32> {
        let mut tokens = Vec::with_capacity(syllables.len() * 2);
        for syllable in syllables {
            let (head, tail) = split_leading_codepoint(syllable.as_ref());
            if head.is_empty() {
                continue;
            }
            match self.string_to_id.get(head) {
                Some(&id) => tokens.push(id),
                None => continue,
            }
            if !tail.is_empty() {
                if let Some(&id) = self.string_to_id.get(tail) {
                    tokens.push(id);
                }
            }
        }
        tokens
    }

    /// Depth-first enumeration of the subtree at `start`, with an explicit
    /// work stack so deep tries cannot exhaust the call stack. The first
    /// `skip_label_prefix` tokens of the start node's label are assumed to
    /// be in `path` already.
    fn collect(
        &self,
        start: usize,
        path: Vec<u32>,
        skip_label_prefix: usize,
        out: &mut Vec<Suggestion>,
    ) {
        let mut stack = vec![(start, path, skip_label_prefix)];
        while let Some((idx, mut prefix, skip)) = stack.pop() {
            let node = &self.nodes[idx];
            prefix.extend_from_slice(&node.label[skip.min(node.label.len())..]);
            if node.frequency >= 0 {
                out.push(Suggestion::new(self.join_tokens(&prefix), node.frequency));
            }
            for &(_, child) in node.children.iter().rev() {
                stack.push((child as usize, prefix.clone(), 0));
            }
        }
    }

    fn join_tokens(&self, tokens: &[u32]) -> String {
        let mut word = String::new();
        for &token in tokens {
            if let Some(s) = self.strings.get(token as usize) {
                word.push_str(s);
            }
        }
        word
    }
}

fn rank(mut matches: Vec<Suggestion>, top_k: usize) -> Vec<Suggestion> {
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(top_k);
    matches
}

fn common_prefix_len(key: &[u32], key_offset: usize, label: &[u32]) -> usize {
    let mut i = 0;
    while key_offset + i < key.len() && i < label.len() && key[key_offset + i] == label[i] {
        i += 1;
    }
    i
}

/// Splits off the leading UTF-8 codepoint by classifying the first byte.
/// No validation beyond clamping to the string length.
fn split_leading_codepoint(text: &str) -> (&str, &str) {
    if text.is_empty() {
        return ("", "");
    }
    let first = text.as_bytes()[0];
    let len = if first & 0x80 == 0x00 {
        1
    } else if first & 0xE0 == 0xC0 {
        2
    } else if first & 0xF0 == 0xE0 {
        3
    } else if first & 0xF8 == 0xF0 {
        4
    } else {
        1
    };
    text.split_at(len.min(text.len()))
}
