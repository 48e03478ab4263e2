//! Fuzzy matcher for misspelled entity tokens
//!
//! Classic edit distance against a small dictionary. Dictionaries here are
//! tens to low hundreds of hotel names, so the O(words × dictionary × len²)
//! scan is fine; switch to length-bucket indexing if that ever changes.

use serde::{Deserialize, Serialize};
use strsim::levenshtein;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub corrected: String,
    pub distance: usize,
}

pub struct FuzzyCorrector {
    /// Accepted distance as a fraction of the input word length.
    pub tolerance_ratio: f64,
}

impl Default for FuzzyCorrector {
    fn default() -> Self {
        // 30% of word length, empirically tuned
        Self { tolerance_ratio: 0.3 }
    }
}

impl FuzzyCorrector {
    pub fn new(tolerance_ratio: f64) -> Self {
        Self { tolerance_ratio }
    }

    /// Maximum accepted edit distance for a word of the given length, in
    /// chars (edit distance counts chars, not bytes).
    pub fn max_distance(&self, word_len: usize) -> usize {
        ((word_len as f64 * self.tolerance_ratio).floor() as usize).max(1)
    }

    /// Map a misspelled word to its closest dictionary entry within tolerance.
    ///
    /// Ties break on the first entry reaching the minimum distance, in
    /// dictionary iteration order, so results are deterministic for a fixed
    /// dictionary ordering.
    pub fn correct<'a, I>(&self, word: &str, dictionary: I) -> Option<Correction>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let word = word.to_lowercase();
        if word.is_empty() {
            return None;
        }
        let threshold = self.max_distance(word.chars().count());

        let mut best: Option<Correction> = None;
        for entry in dictionary {
            let candidate = entry.to_lowercase();
            let distance = levenshtein(&word, &candidate);
            let improves = match &best {
                Some(current) => distance < current.distance,
                None => distance <= threshold,
            };
            if improves {
                let exact = distance == 0;
                best = Some(Correction {
                    corrected: candidate,
                    distance,
                });
                if exact {
                    break;
                }
            }
        }
        best
    }
}
