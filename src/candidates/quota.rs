//! Per-document and global emission quotas.

use crate::config::{QuotaConfig, QuotaMode};

/// Remaining emission allowance; `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quota {
    remaining: Option<usize>,
}

impl Quota {
    /// Quota that never runs out.
    pub fn unlimited() -> Self {
        Self { remaining: None }
    }

    /// Quota of exactly `limit` emissions.
    pub fn limited(limit: usize) -> Self {
        Self {
            remaining: Some(limit),
        }
    }

    /// Configuration convention: `0` means unlimited.
    pub fn from_limit(limit: usize) -> Self {
        if limit == 0 {
            Self::unlimited()
        } else {
            Self::limited(limit)
        }
    }

    /// Remaining allowance, `None` when unlimited.
    pub fn remaining(&self) -> Option<usize> {
        self.remaining
    }

    /// Whether no further emission is allowed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Charge `used` emissions made before this quota was created, saturating at zero.
    pub fn charge(&mut self, used: usize) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(used);
        }
    }

    /// Take one unit. Returns `false` and leaves the quota unchanged when exhausted.
    pub fn consume(&mut self) -> bool {
        match self.remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

/// Per-document quota.
///
/// Fixed mode uses `per_document` (0 = unlimited). Adaptive mode takes the larger of
/// `ceil(chunks * qa_per_chunk)` and `ceil(chars / chars_per_qa)`, clamped to
/// `[min_per_document, max_per_document]`.
pub fn document_quota(config: &QuotaConfig, chunk_count: usize, total_chars: usize) -> Quota {
    match config.mode {
        QuotaMode::Fixed => Quota::from_limit(config.per_document),
        QuotaMode::Adaptive => {
            let by_chunks = (chunk_count as f64 * config.qa_per_chunk).ceil() as usize;
            let by_chars = if config.chars_per_qa == 0 {
                0
            } else {
                total_chars.div_ceil(config.chars_per_qa)
            };
            let min = config.min_per_document;
            let max = config.max_per_document.max(min);
            Quota::limited(by_chunks.max(by_chars).clamp(min, max))
        }
    }
}

/// Share of a global limit given to one of `num_shards` independent workers.
///
/// Ceiling division, so the sum over shards may exceed `global_limit` by up to
/// `num_shards - 1`. `0` keeps meaning unlimited.
pub fn shard_share(global_limit: usize, num_shards: u32) -> usize {
    if global_limit == 0 {
        return 0;
    }
    global_limit.div_ceil(num_shards.max(1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_saturates_and_ignores_unlimited() {
        let mut quota = Quota::limited(3);
        quota.charge(2);
        assert_eq!(quota.remaining(), Some(1));
        quota.charge(5);
        assert!(quota.is_exhausted());

        let mut unlimited = Quota::unlimited();
        unlimited.charge(10);
        assert_eq!(unlimited.remaining(), None);
    }

    #[test]
    fn limited_quota_stops_at_zero() {
        let mut quota = Quota::limited(2);
        assert!(quota.consume());
        assert!(quota.consume());
        assert!(quota.is_exhausted());
        assert!(!quota.consume());
        assert_eq!(quota.remaining(), Some(0));
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let mut quota = Quota::from_limit(0);
        for _ in 0..1000 {
            assert!(quota.consume());
        }
        assert!(!quota.is_exhausted());
    }

    #[test]
    fn adaptive_quota_uses_larger_estimate_and_clamps() {
        let config = QuotaConfig {
            mode: QuotaMode::Adaptive,
            per_document: 0,
            qa_per_chunk: 0.5,
            chars_per_qa: 1000,
            min_per_document: 2,
            max_per_document: 10,
        };
        assert_eq!(document_quota(&config, 7, 1500).remaining(), Some(4));
        assert_eq!(document_quota(&config, 2, 5001).remaining(), Some(6));
        assert_eq!(document_quota(&config, 0, 0).remaining(), Some(2));
        assert_eq!(document_quota(&config, 100, 0).remaining(), Some(10));
    }

    #[test]
    fn fixed_quota_follows_per_document() {
        let config = QuotaConfig {
            per_document: 3,
            ..Default::default()
        };
        assert_eq!(document_quota(&config, 50, 50_000).remaining(), Some(3));
    }

    #[test]
    fn shard_share_rounds_up() {
        assert_eq!(shard_share(10, 3), 4);
        assert_eq!(shard_share(9, 3), 3);
        assert_eq!(shard_share(0, 4), 0);
        assert_eq!(shard_share(1, 4), 1);
    }
}
