//! Token budget policy for story context.
//!
//! Estimation is a cheap character heuristic, not a tokenizer. The estimator
//! and the per-model limit table are both pluggable.

use std::collections::BTreeMap;

/// Marker appended whenever context had to be cut.
pub const TRUNCATION_MARKER: &str = "[content truncated]";

/// Limit used for models missing from the table.
pub const DEFAULT_CONTEXT_LIMIT: usize = 4096;

const BUILTIN_LIMITS: &[(&str, usize)] = &[
    ("qwen2.5-coder:14b", 16_384),
    ("qwen2.5-coder", 16_384),
    ("llama3.1:8b", 8_192),
    ("llama3.1", 8_192),
    ("llama3.3:70b", 131_072),
    ("llama3.3", 131_072),
];

/// Approximate token count for a piece of text.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

/// Counts characters and divides by a fixed ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }
}

/// Per-model context limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLimits {
    entries: Vec<(String, usize)>,
    default_limit: usize,
}

impl ModelLimits {
    /// Built-in table for the locally served models.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_LIMITS
                .iter()
                .map(|(name, limit)| ((*name).to_string(), *limit))
                .collect(),
            default_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    /// Overlay `overrides` on top of the table; overrides are checked first.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, usize>) -> Self {
        let mut entries: Vec<(String, usize)> = overrides
            .iter()
            .map(|(name, limit)| (name.clone(), *limit))
            .collect();
        entries.extend(
            self.entries
                .into_iter()
                .filter(|(name, _)| !overrides.contains_key(name)),
        );
        self.entries = entries;
        self
    }

    /// Resolve the limit for `model`.
    ///
    /// A `provider/` prefix is ignored. Exact names match first, then the
    /// first table entry contained in (or containing) the model name.
    pub fn limit_for(&self, model: &str) -> usize {
        let name = model.rsplit('/').next().unwrap_or(model);
        if let Some((_, limit)) = self.entries.iter().find(|(key, _)| key == name) {
            return *limit;
        }
        self.entries
            .iter()
            .find(|(key, _)| name.contains(key.as_str()) || key.contains(name))
            .map_or(self.default_limit, |(_, limit)| *limit)
    }
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Estimator plus limits plus reserved headroom.
#[derive(Debug, Clone)]
pub struct BudgetPolicy<E = CharRatioEstimator> {
    pub limits: ModelLimits,
    pub estimator: E,
    /// Tokens held back for the surrounding prompt and the response.
    pub reserve_tokens: usize,
    /// Floor for the usable budget.
    pub min_available_tokens: usize,
}

impl Default for BudgetPolicy<CharRatioEstimator> {
    fn default() -> Self {
        Self {
            limits: ModelLimits::builtin(),
            estimator: CharRatioEstimator::default(),
            reserve_tokens: 2000,
            min_available_tokens: 500,
        }
    }
}

impl<E: TokenEstimator> BudgetPolicy<E> {
    /// Usable token budget for context sent to `model`.
    pub fn available_tokens(&self, model: &str) -> usize {
        self.limits
            .limit_for(model)
            .saturating_sub(self.reserve_tokens)
            .max(self.min_available_tokens)
    }
}

/// Text that was fitted to a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fitted {
    pub text: String,
    pub truncated: bool,
}

/// Fit `head` followed by `tail` into `budget` tokens.
///
/// The tail is trimmed first. The head is only cut when it alone does not
/// fit. Truncated output always ends with [`TRUNCATION_MARKER`].
pub fn fit_to_budget(
    head: &str,
    tail: &str,
    budget: usize,
    estimator: &dyn TokenEstimator,
) -> Fitted {
    let full = format!("{head}{tail}");
    if estimator.estimate(&full) <= budget {
        return Fitted {
            text: full,
            truncated: false,
        };
    }

    let suffix = format!("\n\n{TRUNCATION_MARKER}");
    let head_with_suffix = format!("{head}{suffix}");
    let text = if estimator.estimate(&head_with_suffix) <= budget {
        let keep = longest_fitting_prefix(tail, |prefix| {
            estimator.estimate(&format!("{head}{prefix}{suffix}")) <= budget
        });
        format!("{head}{}{suffix}", tail[..keep].trim_end())
    } else {
        let keep = longest_fitting_prefix(head, |prefix| {
            estimator.estimate(&format!("{prefix}{suffix}")) <= budget
        });
        format!("{}{suffix}", head[..keep].trim_end())
    };
    Fitted {
        text,
        truncated: true,
    }
}

/// Byte length of the longest char-aligned prefix of `text` accepted by `fits`.
///
/// `fits` must be monotone: if a prefix fits, every shorter prefix fits.
fn longest_fitting_prefix(text: &str, fits: impl Fn(&str) -> bool) -> usize {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
    if !fits(&text[..boundaries[lo]]) {
        return 0;
    }
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fits(&text[..boundaries[mid]]) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    boundaries[lo]
}
