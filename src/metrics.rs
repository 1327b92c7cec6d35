use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing candidate generation activity.
#[derive(Default)]
pub struct GenerationMetrics {
    files_processed: AtomicU64,
    anchors_seen: AtomicU64,
    anchors_resumed: AtomicU64,
    anchors_ineligible: AtomicU64,
    anchors_without_group: AtomicU64,
    groups_built: AtomicU64,
    plan_fallbacks: AtomicU64,
    groups_abandoned: AtomicU64,
    groups_discarded: AtomicU64,
    llm_retries: AtomicU64,
    candidates_written: AtomicU64,
    candidates_invalid: AtomicU64,
}

impl GenerationMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fully processed input file.
    pub fn record_file(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an anchor inspected by the assembler.
    pub fn record_anchor(&self) {
        self.anchors_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an anchor skipped because the checkpoint already lists it.
    pub fn record_resumed_anchor(&self) {
        self.anchors_resumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an anchor rejected by the eligibility filter.
    pub fn record_ineligible_anchor(&self) {
        self.anchors_ineligible.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an anchor that could not reach the minimum group size.
    pub fn record_anchor_without_group(&self) {
        self.anchors_without_group.fetch_add(1, Ordering::Relaxed);
    }

    /// Record context groups assembled for one anchor.
    pub fn record_groups(&self, count: u64) {
        self.groups_built.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a group that continued without a validated plan.
    pub fn record_plan_fallback(&self) {
        self.plan_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a group abandoned after exhausting transient retries.
    pub fn record_group_abandoned(&self) {
        self.groups_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a group whose generate output could not be used.
    pub fn record_group_discarded(&self) {
        self.groups_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record retry attempts spent on a single model call.
    pub fn record_retries(&self, retries: u64) {
        self.llm_retries.fetch_add(retries, Ordering::Relaxed);
    }

    /// Record persisted and invalid candidates for one group.
    pub fn record_candidates(&self, written: u64, invalid: u64) {
        self.candidates_written.fetch_add(written, Ordering::Relaxed);
        self.candidates_invalid.fetch_add(invalid, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            anchors_seen: self.anchors_seen.load(Ordering::Relaxed),
            anchors_resumed: self.anchors_resumed.load(Ordering::Relaxed),
            anchors_ineligible: self.anchors_ineligible.load(Ordering::Relaxed),
            anchors_without_group: self.anchors_without_group.load(Ordering::Relaxed),
            groups_built: self.groups_built.load(Ordering::Relaxed),
            plan_fallbacks: self.plan_fallbacks.load(Ordering::Relaxed),
            groups_abandoned: self.groups_abandoned.load(Ordering::Relaxed),
            groups_discarded: self.groups_discarded.load(Ordering::Relaxed),
            llm_retries: self.llm_retries.load(Ordering::Relaxed),
            candidates_written: self.candidates_written.load(Ordering::Relaxed),
            candidates_invalid: self.candidates_invalid.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of generation counters used for end-of-run reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Input files fully processed.
    pub files_processed: u64,
    /// Anchors inspected.
    pub anchors_seen: u64,
    /// Anchors skipped because they were already checkpointed.
    pub anchors_resumed: u64,
    /// Anchors rejected by label filters or blank content.
    pub anchors_ineligible: u64,
    /// Anchors whose neighbor pool could not fill the minimum group.
    pub anchors_without_group: u64,
    /// Context groups assembled.
    pub groups_built: u64,
    /// Groups generated without a validated plan.
    pub plan_fallbacks: u64,
    /// Groups abandoned after transient failures.
    pub groups_abandoned: u64,
    /// Groups whose generate output was malformed.
    pub groups_discarded: u64,
    /// Retry attempts spent across all model calls.
    pub llm_retries: u64,
    /// Candidates appended to output files.
    pub candidates_written: u64,
    /// Model-emitted pairs rejected by the validator.
    pub candidates_invalid: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_groups_and_candidates() {
        let metrics = GenerationMetrics::new();
        metrics.record_anchor();
        metrics.record_groups(2);
        metrics.record_candidates(3, 1);
        metrics.record_candidates(2, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.anchors_seen, 1);
        assert_eq!(snapshot.groups_built, 2);
        assert_eq!(snapshot.candidates_written, 5);
        assert_eq!(snapshot.candidates_invalid, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let metrics = GenerationMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
