// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Content digests
//!
//! Uses BLAKE3 for artifact and manifest digests.

use blake3::Hasher;

/// Incremental content digest
pub struct ContentDigest {
    hasher: Hasher,
}

impl ContentDigest {
    /// Create a new digest
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Feed a labelled chunk; the label keeps `("ab", "c")` and `("a", "bc")` apart
    pub fn update_labelled(&mut self, label: &str, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&(label.len() as u64).to_le_bytes());
        self.hasher.update(label.as_bytes());
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Finish and return the hex digest
    pub fn finalize(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex digest of a byte slice
pub fn digest_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
