// File: src/core/lstm.rs
//
// Syllable-level LSTM inference. The model is a single recurrent layer
// between an embedding lookup and a dense projection:
//
//   embedding (V x E) -> LSTM cell (H units) -> dense (V x H) -> softmax
//
// Weights arrive in one little-endian blob with a 24-byte header; see
// `load_model` for the layout. All tensors are copied into engine-owned
// buffers so the input blob can be freed right after loading.

use crate::core::reader::ByteReader;
use crate::core::types::LoadError;
use crate::core::vocab::SyllableVocab;
use tracing::{info, warn};

const LSTM_MAGIC: u32 = 0x4C53_544D; // "LSTM"
const LSTM_VERSION: u32 = 1;
const HEADER_LEN: usize = 24;

/// Sequence length reported before a model has been loaded.
const DEFAULT_SEQUENCE_LENGTH: usize = 5;

pub struct LstmEngine {
    vocab_size: usize,
    embedding_dim: usize,
    hidden_size: usize,
    sequence_length: usize,

    // Row-major weight tensors.
    embedding: Vec<f32>,      // [vocab_size, embedding_dim]
    lstm_kernel: Vec<f32>,    // [4 * hidden_size, embedding_dim]
    lstm_recurrent: Vec<f32>, // [4 * hidden_size, hidden_size]
    lstm_bias: Vec<f32>,      // [4 * hidden_size]
    dense_weights: Vec<f32>,  // [vocab_size, hidden_size]
    dense_bias: Vec<f32>,     // [vocab_size]

    // Scratch buffers reused across predictions.
    h_state: Vec<f32>,
    c_state: Vec<f32>,
    gates: Vec<f32>,
    embedded: Vec<f32>,
    output_probs: Vec<f32>,

    vocab: SyllableVocab,
    model_loaded: bool,
    vocab_loaded: bool,
}

impl LstmEngine {
    pub fn new() -> Self {
        Self {
            vocab_size: 0,
            embedding_dim: 0,
            hidden_size: 0,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            embedding: Vec::new(),
            lstm_kernel: Vec::new(),
            lstm_recurrent: Vec::new(),
            lstm_bias: Vec::new(),
            dense_weights: Vec::new(),
            dense_bias: Vec::new(),
            h_state: Vec::new(),
            c_state: Vec::new(),
            gates: Vec::new(),
            embedded: Vec::new(),
            output_probs: Vec::new(),
            vocab: SyllableVocab::new(),
            model_loaded: false,
            vocab_loaded: false,
        }
    }

    /// Parses the binary model blob and takes ownership of all weights.
    ///
    /// Layout (little-endian): magic, version, vocab_size V, embedding_dim E,
    /// hidden_size H, sequence_length S (u32 each), then the tensors in
    /// order: embedding `V*E`, lstm_kernel `4H*E`, lstm_recurrent `4H*H`,
    /// lstm_bias `4H`, dense_weights `V*H`, dense_bias `V`, all f32.
    /// Trailing bytes are ignored.
    pub fn load_model(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if data.len() < HEADER_LEN {
            return Err(LoadError::Truncated {
                offset: 0,
                need: HEADER_LEN,
                have: data.len(),
            });
        }

        let mut r = ByteReader::new(data);
        let magic = r.read_u32()?;
        if magic != LSTM_MAGIC {
            warn!("lstm model magic mismatch: got {magic:#010x}");
            return Err(LoadError::BadMagic {
                expected: LSTM_MAGIC,
                got: magic,
            });
        }
        let version = r.read_u32()?;
        if version != LSTM_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let vocab_size = r.read_u32()? as usize;
        let embedding_dim = r.read_u32()? as usize;
        let hidden_size = r.read_u32()? as usize;
        let sequence_length = r.read_u32()? as usize;

        // Keeps tensor-size arithmetic far away from overflow; no real
        // on-device model comes near these.
        const MAX_DIM: usize = 1 << 20;
        if vocab_size > MAX_DIM || embedding_dim > MAX_DIM || hidden_size > MAX_DIM {
            return Err(LoadError::Malformed("model dimensions out of range"));
        }

        self.embedding = r.read_f32s(vocab_size * embedding_dim)?;
        self.lstm_kernel = r.read_f32s(4 * hidden_size * embedding_dim)?;
        self.lstm_recurrent = r.read_f32s(4 * hidden_size * hidden_size)?;
        self.lstm_bias = r.read_f32s(4 * hidden_size)?;
        self.dense_weights = r.read_f32s(vocab_size * hidden_size)?;
        self.dense_bias = r.read_f32s(vocab_size)?;

        self.vocab_size = vocab_size;
        self.embedding_dim = embedding_dim;
        self.hidden_size = hidden_size;
        self.sequence_length = sequence_length;

        self.h_state = vec![0.0; hidden_size];
        self.c_state = vec![0.0; hidden_size];
        self.gates = vec![0.0; 4 * hidden_size];
        self.embedded = vec![0.0; embedding_dim];
        self.output_probs = vec![0.0; vocab_size];

        self.model_loaded = true;
        info!(
            vocab = vocab_size,
            embed = embedding_dim,
            hidden = hidden_size,
            seq_len = sequence_length,
            "lstm model loaded"
        );
        Ok(())
    }

    /// Parses the `{ "syll": int, ... }` vocabulary. Entries parsed before a
    /// structural problem stay visible; zero entries is an error.
    pub fn load_vocab(&mut self, json: &str) -> Result<usize, LoadError> {
        let result = self.vocab.parse(json);
        self.vocab_loaded = self.vocab.entry_count() > 0;
        if let Ok(count) = result {
            info!(entries = count, "lstm vocabulary loaded");
        }
        result
    }

    /// Runs the forward pass over up to `sequence_length` syllable indices
    /// and returns the softmax distribution over the vocabulary. Shorter
    /// inputs are right-aligned with zero padding; out-of-range indices are
    /// clamped to 0. Returns `None` until a model has been loaded.
    pub fn predict(&mut self, input_indices: &[i32]) -> Option<&[f32]> {
        if !self.model_loaded {
            return None;
        }

        let seq_len = self.sequence_length;
        let embed = self.embedding_dim;
        let hidden = self.hidden_size;
        let vocab = self.vocab_size;

        self.h_state.fill(0.0);
        self.c_state.fill(0.0);

        let pad = seq_len - input_indices.len().min(seq_len);
        for t in 0..seq_len {
            let idx = if t < pad {
                0
            } else {
                let raw = input_indices[t - pad];
                if raw < 0 || raw as usize >= vocab {
                    0
                } else {
                    raw as usize
                }
            };

            self.embedded
                .copy_from_slice(&self.embedding[idx * embed..(idx + 1) * embed]);
            lstm_cell(
                &self.lstm_kernel,
                &self.lstm_recurrent,
                &self.lstm_bias,
                &self.embedded,
                &mut self.h_state,
                &mut self.c_state,
                &mut self.gates,
                hidden,
                embed,
            );
        }

        for v in 0..vocab {
            let mut sum = self.dense_bias[v];
            let row = &self.dense_weights[v * hidden..(v + 1) * hidden];
            for j in 0..hidden {
                sum += self.h_state[j] * row[j];
            }
            self.output_probs[v] = sum;
        }
        softmax(&mut self.output_probs);

        Some(&self.output_probs)
    }

    /// Vocabulary size declared by the model header, 0 until loaded.
    pub fn vocab_size(&self) -> usize {
        if self.model_loaded {
            self.vocab_size
        } else {
            0
        }
    }

    pub fn sequence_length(&self) -> usize {
        if self.model_loaded {
            self.sequence_length
        } else {
            DEFAULT_SEQUENCE_LENGTH
        }
    }

    pub fn syllable(&self, index: usize) -> Option<&str> {
        if !self.vocab_loaded {
            return None;
        }
        self.vocab.syllable(index)
    }

    pub fn index_of(&self, syllable: &str) -> i32 {
        if !self.vocab_loaded {
            return -1;
        }
        self.vocab.index_of(syllable)
    }

    pub fn vocab_entry_count(&self) -> usize {
        self.vocab.entry_count()
    }
}

impl Default for LstmEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One LSTM step. Gate layout inside `gates` is [i, f, c-candidate, o],
/// each `hidden` wide. The preactivation order is fixed: bias, then
/// kernel * x, then recurrent * h, so outputs stay bit-reproducible.
#[allow(clippy::too_many_arguments)]
fn lstm_cell(
    kernel: &[f32],
    recurrent: &[f32],
    bias: &[f32],
    x: &[f32],
    h: &mut [f32],
    c: &mut [f32],
    gates: &mut [f32],
    hidden: usize,
    embed: usize,
) {
    gates.copy_from_slice(bias);

    for i in 0..4 * hidden {
        let row = &kernel[i * embed..(i + 1) * embed];
        let mut sum = 0.0;
        for j in 0..embed {
            sum += row[j] * x[j];
        }
        gates[i] += sum;
    }

    for i in 0..4 * hidden {
        let row = &recurrent[i * hidden..(i + 1) * hidden];
        let mut sum = 0.0;
        for j in 0..hidden {
            sum += row[j] * h[j];
        }
        gates[i] += sum;
    }

    for i in 0..hidden {
        let gate_i = sigmoid(gates[i]);
        let gate_f = sigmoid(gates[hidden + i]);
        let gate_c = gates[2 * hidden + i].tanh();
        let gate_o = sigmoid(gates[3 * hidden + i]);

        c[i] = gate_f * c[i] + gate_i * gate_c;
        h[i] = gate_o * c[i].tanh();
    }
}

/// In-place softmax with max subtraction for numerical stability.
fn softmax(v: &mut [f32]) {
    if v.is_empty() {
        return;
    }
    let mut max_val = v[0];
    for &x in v[1..].iter() {
        if x > max_val {
            max_val = x;
        }
    }
    let mut sum = 0.0;
    for x in v.iter_mut() {
        *x = (*x - max_val).exp();
        sum += *x;
    }
    for x in v.iter_mut() {
        *x /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: usize = 4;
    const E: usize = 2;
    const H: usize = 3;
    const S: usize = 2;

    fn push_f32s(buf: &mut Vec<u8>, values: &[f32]) {
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn model_bytes(
        embedding: &[f32],
        kernel: &[f32],
        recurrent: &[f32],
        lstm_bias: &[f32],
        dense_w: &[f32],
        dense_b: &[f32],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        for header in [LSTM_MAGIC, LSTM_VERSION, V as u32, E as u32, H as u32, S as u32] {
            buf.extend_from_slice(&header.to_le_bytes());
        }
        push_f32s(&mut buf, embedding);
        push_f32s(&mut buf, kernel);
        push_f32s(&mut buf, recurrent);
        push_f32s(&mut buf, lstm_bias);
        push_f32s(&mut buf, dense_w);
        push_f32s(&mut buf, dense_b);
        buf
    }

    /// Zero LSTM weights and dense layer: every input ends in h = 0, so
    /// the logits are all zero and softmax is uniform.
    fn zero_model() -> Vec<u8> {
        let embedding: Vec<f32> = (0..V * E).map(|i| if i % (E + 1) == 0 { 1.0 } else { 0.0 }).collect();
        model_bytes(
            &embedding,
            &vec![0.0; 4 * H * E],
            &vec![0.0; 4 * H * H],
            &vec![0.0; 4 * H],
            &vec![0.0; V * H],
            &vec![0.0; V],
        )
    }

    /// Deterministic non-trivial weights so tests exercise real arithmetic.
    fn varied_model() -> Vec<u8> {
        let gen = |n: usize, salt: usize| -> Vec<f32> {
            (0..n)
                .map(|i| (((i * 31 + salt * 7) % 17) as f32 - 8.0) * 0.05)
                .collect()
        };
        model_bytes(
            &gen(V * E, 1),
            &gen(4 * H * E, 2),
            &gen(4 * H * H, 3),
            &gen(4 * H, 4),
            &gen(V * H, 5),
            &gen(V, 6),
        )
    }

    fn loaded(bytes: &[u8]) -> LstmEngine {
        let mut engine = LstmEngine::new();
        engine.load_model(bytes).unwrap();
        engine
    }

    #[test]
    fn zero_weights_give_uniform_distribution() {
        let mut engine = loaded(&zero_model());
        let probs = engine.predict(&[2, 3]).unwrap();
        assert_eq!(probs.len(), V);
        for &p in probs {
            assert!((p - 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn softmax_law_holds_on_varied_weights() {
        let mut engine = loaded(&varied_model());
        let probs = engine.predict(&[1, 3]).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        for &p in probs {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn short_input_equals_explicit_zero_padding() {
        let mut engine = loaded(&varied_model());
        let padded: Vec<u32> = engine.predict(&[0, 3]).unwrap().iter().map(|p| p.to_bits()).collect();
        let short: Vec<u32> = engine.predict(&[3]).unwrap().iter().map(|p| p.to_bits()).collect();
        assert_eq!(short, padded);
    }

    #[test]
    fn prediction_is_deterministic() {
        let mut engine = loaded(&varied_model());
        let first: Vec<u32> = engine.predict(&[1, 2]).unwrap().iter().map(|p| p.to_bits()).collect();
        let second: Vec<u32> = engine.predict(&[1, 2]).unwrap().iter().map(|p| p.to_bits()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn predictions_do_not_leak_state_between_calls() {
        let mut engine = loaded(&varied_model());
        let first: Vec<u32> = engine.predict(&[1, 2]).unwrap().iter().map(|p| p.to_bits()).collect();
        engine.predict(&[3, 3]).unwrap();
        let again: Vec<u32> = engine.predict(&[1, 2]).unwrap().iter().map(|p| p.to_bits()).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn out_of_range_indices_clamp_to_zero() {
        let mut engine = loaded(&varied_model());
        let clamped: Vec<u32> = engine.predict(&[-5, 99]).unwrap().iter().map(|p| p.to_bits()).collect();
        let zeros: Vec<u32> = engine.predict(&[0, 0]).unwrap().iter().map(|p| p.to_bits()).collect();
        assert_eq!(clamped, zeros);
    }

    #[test]
    fn overlong_input_consumes_the_first_sequence_length_indices() {
        let mut engine = loaded(&varied_model());
        let overlong: Vec<u32> = engine.predict(&[1, 2, 3]).unwrap().iter().map(|p| p.to_bits()).collect();
        let exact: Vec<u32> = engine.predict(&[1, 2]).unwrap().iter().map(|p| p.to_bits()).collect();
        assert_eq!(overlong, exact);
    }

    #[test]
    fn header_validation_rejects_bad_buffers() {
        let mut engine = LstmEngine::new();
        assert!(matches!(
            engine.load_model(&[0u8; 10]),
            Err(LoadError::Truncated { .. })
        ));

        let mut bad_magic = zero_model();
        bad_magic[0] ^= 0xFF;
        assert!(matches!(
            engine.load_model(&bad_magic),
            Err(LoadError::BadMagic { .. })
        ));

        let mut bad_version = zero_model();
        bad_version[4] = 9;
        assert_eq!(
            engine.load_model(&bad_version),
            Err(LoadError::UnsupportedVersion(9))
        );

        let full = zero_model();
        let undersized = &full[..full.len() - 4];
        assert!(matches!(
            engine.load_model(undersized),
            Err(LoadError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = zero_model();
        bytes.extend_from_slice(&[0xAB; 16]);
        let mut engine = LstmEngine::new();
        engine.load_model(&bytes).unwrap();
        assert_eq!(engine.vocab_size(), V);
        assert_eq!(engine.sequence_length(), S);
    }

    #[test]
    fn unloaded_engine_returns_sentinels() {
        let mut engine = LstmEngine::new();
        assert!(engine.predict(&[1]).is_none());
        assert_eq!(engine.vocab_size(), 0);
        assert_eq!(engine.sequence_length(), 5);
        assert_eq!(engine.syllable(0), None);
        assert_eq!(engine.index_of("က"), -1);
    }

    #[test]
    fn vocab_round_trip_through_the_engine() {
        let mut engine = LstmEngine::new();
        engine.load_vocab(r#"{"က": 1, "ခ": 2}"#).unwrap();
        assert_eq!(engine.index_of("က"), 1);
        assert_eq!(engine.syllable(2), Some("ခ"));
        assert_eq!(engine.vocab_entry_count(), 2);
    }
}
