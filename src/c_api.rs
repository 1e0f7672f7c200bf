// File: src/c_api.rs
//
// Raw-pointer surface for the host keyboard. Every engine lives behind an
// opaque heap handle owned by the caller; every entry point null-checks its
// arguments and wraps the real work in catch_unwind so a panic can never
// cross the FFI boundary. Suggestion lists travel as JSON strings; every
// string handed out here must be released with myanmar_ime_free_string.

use crate::core::types::Suggestion;
use crate::{LstmEngine, NgramEngine, Trie};
use libc::c_char;
use std::ffi::{CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::slice;
use tracing::error;

fn suggestions_to_json(suggestions: &[Suggestion]) -> *mut c_char {
    let json = serde_json::to_string(suggestions).unwrap_or_else(|_| "[]".to_string());
    match CString::new(json) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn string_to_c(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Releases any string allocated by this library.
#[no_mangle]
pub extern "C" fn myanmar_ime_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

// --- LSTM engine ---

#[no_mangle]
pub extern "C" fn myanmar_lstm_create() -> *mut LstmEngine {
    catch_unwind(|| Box::into_raw(Box::new(LstmEngine::new()))).unwrap_or(ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_destroy(engine: *mut LstmEngine) {
    if !engine.is_null() {
        unsafe {
            drop(Box::from_raw(engine));
        }
    }
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_load_model(
    engine: *mut LstmEngine,
    data: *const u8,
    len: usize,
) -> i32 {
    if engine.is_null() || data.is_null() || len == 0 {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &mut *engine };
        let bytes = unsafe { slice::from_raw_parts(data, len) };
        match engine.load_model(bytes) {
            Ok(()) => 1,
            Err(e) => {
                error!(error = %e, "lstm model load failed");
                0
            }
        }
    }));
    result.unwrap_or_else(|_| {
        error!("panic in myanmar_lstm_load_model");
        0
    })
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_load_vocab(engine: *mut LstmEngine, json: *const c_char) -> i32 {
    if engine.is_null() || json.is_null() {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &mut *engine };
        let json = unsafe { CStr::from_ptr(json) }.to_string_lossy();
        match engine.load_vocab(&json) {
            Ok(_) => 1,
            Err(e) => {
                error!(error = %e, "lstm vocab load failed");
                0
            }
        }
    }));
    result.unwrap_or(0)
}

/// Writes the probability distribution for the next syllable into `out`.
/// Returns the number of probabilities written, or 0 when no model is
/// loaded or `out_cap` is too small.
#[no_mangle]
pub extern "C" fn myanmar_lstm_predict(
    engine: *mut LstmEngine,
    indices: *const i32,
    count: usize,
    out: *mut f32,
    out_cap: usize,
) -> i32 {
    if engine.is_null() || indices.is_null() || out.is_null() {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &mut *engine };
        let input = unsafe { slice::from_raw_parts(indices, count) };
        match engine.predict(input) {
            Some(probs) if probs.len() <= out_cap => {
                unsafe {
                    ptr::copy_nonoverlapping(probs.as_ptr(), out, probs.len());
                }
                probs.len() as i32
            }
            _ => 0,
        }
    }));
    result.unwrap_or_else(|_| {
        error!("panic in myanmar_lstm_predict");
        0
    })
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_vocab_size(engine: *const LstmEngine) -> i32 {
    if engine.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*engine }.vocab_size() as i32)).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_sequence_length(engine: *const LstmEngine) -> i32 {
    if engine.is_null() {
        return 5;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*engine }.sequence_length() as i32)).unwrap_or(5)
}

/// Returns the syllable at `index` as a fresh string, or null when the
/// index is unmapped. The caller frees it.
#[no_mangle]
pub extern "C" fn myanmar_lstm_syllable(engine: *const LstmEngine, index: i32) -> *mut c_char {
    if engine.is_null() || index < 0 {
        return ptr::null_mut();
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &*engine };
        match engine.syllable(index as usize) {
            Some(syllable) => string_to_c(syllable),
            None => ptr::null_mut(),
        }
    }));
    result.unwrap_or(ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn myanmar_lstm_index(engine: *const LstmEngine, syllable: *const c_char) -> i32 {
    if engine.is_null() || syllable.is_null() {
        return -1;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &*engine };
        let syllable = unsafe { CStr::from_ptr(syllable) }.to_string_lossy();
        engine.index_of(&syllable)
    }));
    result.unwrap_or(-1)
}

// --- Radix trie ---

#[no_mangle]
pub extern "C" fn myanmar_trie_create() -> *mut Trie {
    catch_unwind(|| Box::into_raw(Box::new(Trie::new()))).unwrap_or(ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn myanmar_trie_destroy(trie: *mut Trie) {
    if !trie.is_null() {
        unsafe {
            drop(Box::from_raw(trie));
        }
    }
}

#[no_mangle]
pub extern "C" fn myanmar_trie_load(trie: *mut Trie, path: *const c_char) -> i32 {
    if trie.is_null() || path.is_null() {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let trie = unsafe { &mut *trie };
        let path = unsafe { CStr::from_ptr(path) }.to_string_lossy().into_owned();
        match trie.load(Path::new(&path)) {
            Ok(()) => 1,
            Err(e) => {
                error!(error = %e, path = %path, "trie load failed");
                0
            }
        }
    }));
    result.unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_trie_load_from_memory(
    trie: *mut Trie,
    data: *const u8,
    len: usize,
) -> i32 {
    if trie.is_null() || data.is_null() || len == 0 {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let trie = unsafe { &mut *trie };
        let bytes = unsafe { slice::from_raw_parts(data, len) };
        match trie.load_from_memory(bytes) {
            Ok(()) => 1,
            Err(e) => {
                error!(error = %e, "trie load failed");
                0
            }
        }
    }));
    result.unwrap_or(0)
}

/// Completions of the typed syllable sequence as a JSON array of
/// `{"word": ..., "score": ...}`, best first. The caller frees the string.
#[no_mangle]
pub extern "C" fn myanmar_trie_suggest_partial(
    trie: *const Trie,
    syllables: *const *const c_char,
    syllable_count: usize,
    top_k: usize,
) -> *mut c_char {
    if trie.is_null() || syllables.is_null() {
        return string_to_c("[]");
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let trie = unsafe { &*trie };
        let raw = unsafe { slice::from_raw_parts(syllables, syllable_count) };
        let input: Vec<String> = raw
            .iter()
            .filter(|p| !p.is_null())
            .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
            .collect();
        let suggestions = trie.suggest_partial(&input, top_k);
        suggestions_to_json(&suggestions)
    }));
    result.unwrap_or_else(|_| {
        error!("panic in myanmar_trie_suggest_partial");
        string_to_c("[]")
    })
}

// --- N-gram engine ---

#[no_mangle]
pub extern "C" fn myanmar_ngram_create() -> *mut NgramEngine {
    catch_unwind(|| Box::into_raw(Box::new(NgramEngine::new()))).unwrap_or(ptr::null_mut())
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_destroy(engine: *mut NgramEngine) {
    if !engine.is_null() {
        unsafe {
            drop(Box::from_raw(engine));
        }
    }
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_load_vocabulary(
    engine: *mut NgramEngine,
    data: *const u8,
    len: usize,
) -> i32 {
    if engine.is_null() || data.is_null() || len == 0 {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &mut *engine };
        let bytes = unsafe { slice::from_raw_parts(data, len) };
        match engine.load_vocabulary(bytes) {
            Ok(()) => 1,
            Err(e) => {
                error!(error = %e, "ngram vocabulary load failed");
                0
            }
        }
    }));
    result.unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_load_bigrams(
    engine: *mut NgramEngine,
    data: *const u8,
    len: usize,
) -> i32 {
    if engine.is_null() || data.is_null() || len == 0 {
        return 0;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &mut *engine };
        let bytes = unsafe { slice::from_raw_parts(data, len) };
        match engine.load_bigrams(bytes) {
            Ok(()) => 1,
            Err(e) => {
                error!(error = %e, "ngram bigram load failed");
                0
            }
        }
    }));
    result.unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_is_ready(engine: *const NgramEngine) -> i32 {
    if engine.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*engine }.is_ready() as i32)).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_vocab_size(engine: *const NgramEngine) -> i32 {
    if engine.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*engine }.vocab_size() as i32)).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn myanmar_ngram_bigram_count(engine: *const NgramEngine) -> i32 {
    if engine.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*engine }.bigram_count() as i32)).unwrap_or(0)
}

/// Next-word predictions after `prev_word` as a JSON array; caller frees.
#[no_mangle]
pub extern "C" fn myanmar_ngram_predict(
    engine: *const NgramEngine,
    prev_word: *const c_char,
    top_k: usize,
) -> *mut c_char {
    if engine.is_null() || prev_word.is_null() {
        return string_to_c("[]");
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &*engine };
        let prev_word = unsafe { CStr::from_ptr(prev_word) }.to_string_lossy();
        suggestions_to_json(&engine.predict(&prev_word, top_k))
    }));
    result.unwrap_or_else(|_| {
        error!("panic in myanmar_ngram_predict");
        string_to_c("[]")
    })
}

/// Merged bigram + completion suggestions for the raw editor text as a
/// JSON array; caller frees.
#[no_mangle]
pub extern "C" fn myanmar_ngram_get_suggestions(
    engine: *const NgramEngine,
    text: *const c_char,
    top_k: usize,
) -> *mut c_char {
    if engine.is_null() || text.is_null() {
        return string_to_c("[]");
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        let engine = unsafe { &*engine };
        let text = unsafe { CStr::from_ptr(text) }.to_string_lossy();
        suggestions_to_json(&engine.get_suggestions(&text, top_k))
    }));
    result.unwrap_or_else(|_| {
        error!("panic in myanmar_ngram_get_suggestions");
        string_to_c("[]")
    })
}
