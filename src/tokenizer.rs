// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokenizer seam for the steered generator.
//!
//! [`TextCodec`] is all the generator needs from a tokenizer;
//! [`HfTokenizer`] implements it over the `HuggingFace` `tokenizers` crate.

use crate::error::{Result, SweepError};

/// Text ↔ token-id conversion.
pub trait TextCodec: Send + Sync {
    /// Encode text into token IDs, adding the model's special tokens
    /// (e.g. BOS) the way inference expects.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Tokenizer`] if encoding fails.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs back to a string.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Tokenizer`] if decoding fails.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// `HuggingFace` `tokenizers` backend.
///
/// ```no_run
/// use candle_sweep::{HfTokenizer, TextCodec};
///
/// # fn main() -> candle_sweep::Result<()> {
/// let tok = HfTokenizer::from_path("tokenizer.json")?;
/// let ids = tok.encode("I feel")?;
/// assert!(!ids.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct HfTokenizer(Box<tokenizers::Tokenizer>);

impl HfTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Tokenizer`] if the file cannot be loaded or parsed.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let tok = tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| {
            SweepError::Tokenizer(format!(
                "failed to load HF tokenizer from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self(Box::new(tok)))
    }

    /// Wrap an already-loaded tokenizer.
    #[must_use]
    pub fn new(tokenizer: tokenizers::Tokenizer) -> Self {
        Self(Box::new(tokenizer))
    }

    /// Vocabulary size, including added tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.0.get_vocab_size(true)
    }
}

impl TextCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .0
            .encode(text, true)
            .map_err(|e| SweepError::Tokenizer(format!("HF encode failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.0
            .decode(ids, false)
            .map_err(|e| SweepError::Tokenizer(format!("HF decode failed: {e}")))
    }
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HfTokenizer")
            .field(&self.vocab_size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
