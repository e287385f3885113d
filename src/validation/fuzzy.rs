//! Approximate name matching
//!
//! Names are normalized (lowercased, honorifics dropped, non-alphabetic
//! characters removed, whitespace collapsed) and compared with the
//! optimal-string-alignment distance, where an adjacent transposition
//! costs 1.

use crate::config::ValidationConfig;

/// Result of comparing a declared name with a vendor-confirmed one
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    pub declared: String,
    pub returned: String,
    pub distance: usize,
    /// `distance / len(declared)` on normalized names
    pub ratio: f64,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct NameMatcher {
    threshold: f64,
    min_len: usize,
    honorifics: Vec<String>,
}

impl NameMatcher {
    pub fn new(threshold: f64, min_len: usize, honorifics: Vec<String>) -> Self {
        Self {
            threshold,
            min_len,
            honorifics: honorifics.into_iter().map(|h| h.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(
            config.name_match_threshold,
            config.min_name_length,
            config.honorifics.clone(),
        )
    }

    pub fn normalize(&self, name: &str) -> String {
        name.split_whitespace()
            .map(|token| token.trim_end_matches('.').to_lowercase())
            .filter(|token| !self.honorifics.contains(token))
            .map(|token| token.chars().filter(|c| c.is_alphabetic()).collect::<String>())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Compare `declared` against `returned`.
    ///
    /// Exact match after normalization is accepted without computing the
    /// distance. Declared names shorter than the minimum length are never
    /// accepted approximately.
    pub fn compare(&self, declared: &str, returned: &str) -> NameMatch {
        let declared = self.normalize(declared);
        let returned = self.normalize(returned);

        if !declared.is_empty() && declared == returned {
            return NameMatch {
                declared,
                returned,
                distance: 0,
                ratio: 0.0,
                accepted: true,
            };
        }

        let len = declared.chars().count();
        let distance = osa_distance(&declared, &returned);
        let ratio = if len == 0 {
            1.0
        } else {
            distance as f64 / len as f64
        };
        let accepted = len >= self.min_len && ratio <= self.threshold;
        NameMatch {
            declared,
            returned,
            distance,
            ratio,
            accepted,
        }
    }
}

/// Optimal string alignment distance over chars
pub fn osa_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let width = m + 1;
    let mut d = vec![0usize; (n + 1) * width];
    for i in 0..=n {
        d[i * width] = i;
    }
    for j in 0..=m {
        d[j] = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (d[(i - 1) * width + j] + 1)
                .min(d[i * width + j - 1] + 1)
                .min(d[(i - 1) * width + j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(d[(i - 2) * width + j - 2] + 1);
            }
            d[i * width + j] = best;
        }
    }
    d[n * width + m]
}
