//! Cross-iteration warning ledger.
//!
//! Validation feedback is deduplicated by [`Warning::key`] so the model is
//! never shown the same complaint twice, and resolution is tracked per key so
//! a session ends with a complete occurrence/resolution timeline. Entries are
//! monotonic: once created they persist for the whole session.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::types::Warning;

/// A warning plus the iterations where it appeared and disappeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedWarning {
    pub warning: Warning,
    pub iteration_occurred: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_resolved: Option<u32>,
}

/// Seen-set, pre-existing tags, and per-key tracking for one session.
#[derive(Debug, Clone, Default)]
pub struct WarningLedger {
    seen: HashSet<String>,
    pre_existing: HashSet<String>,
    // BTreeMap keeps the timeline deterministic across runs.
    tracked: BTreeMap<String, TrackedWarning>,
}

impl WarningLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings whose key has not been shown yet, input order preserved.
    pub fn filter_new<'a>(&self, warnings: &'a [Warning]) -> Vec<&'a Warning> {
        warnings
            .iter()
            .filter(|warning| !self.seen.contains(&warning.key()))
            .collect()
    }

    pub fn mark_seen(&mut self, warnings: &[Warning]) {
        for warning in warnings {
            self.seen.insert(warning.key());
        }
    }

    /// True if every reported key was already shown. An all-seen validation
    /// result means showing the list again cannot change model behavior, so
    /// the iteration converged.
    pub fn all_seen(&self, warnings: &[Warning]) -> bool {
        warnings
            .iter()
            .all(|warning| self.seen.contains(&warning.key()))
    }

    /// Tag warnings found by validating the baseline artifact, before any
    /// edits. Feedback labels these `[pre-existing]` so the model can decide
    /// whether they are in scope for the current request.
    pub fn mark_pre_existing(&mut self, warnings: &[Warning]) {
        for warning in warnings {
            self.pre_existing.insert(warning.key());
        }
    }

    pub fn is_pre_existing(&self, warning: &Warning) -> bool {
        self.pre_existing.contains(&warning.key())
    }

    /// Start tracking a warning the first time its key appears. Later
    /// sightings keep the original occurrence iteration.
    pub fn record(&mut self, warning: &Warning, iteration: u32) {
        self.tracked
            .entry(warning.key())
            .or_insert_with(|| TrackedWarning {
                warning: warning.clone(),
                iteration_occurred: iteration,
                iteration_resolved: None,
            });
    }

    /// Mark one warning resolved, keeping the earliest resolution iteration.
    pub fn mark_resolved(&mut self, warning: &Warning, iteration: u32) {
        if let Some(entry) = self.tracked.get_mut(&warning.key())
            && entry.iteration_resolved.is_none()
        {
            entry.iteration_resolved = Some(iteration);
        }
    }

    /// Mark every tracked key absent from `current` as resolved at
    /// `iteration`. Already-resolved entries keep their original iteration.
    pub fn update_resolution_status(&mut self, current: &[Warning], iteration: u32) {
        let current_keys: HashSet<String> = current.iter().map(Warning::key).collect();
        for (key, entry) in &mut self.tracked {
            if entry.iteration_resolved.is_none() && !current_keys.contains(key) {
                entry.iteration_resolved = Some(iteration);
            }
        }
    }

    /// Occurrence/resolution history in key order.
    pub fn timeline(&self) -> Vec<TrackedWarning> {
        self.tracked.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::WarningLedger;
    use crate::core::types::Warning;

    fn warning(code: &str, node: &str, message: &str) -> Warning {
        Warning::for_node(code, message, node)
    }

    /// Once seen, a key never comes back from filter_new, even reworded.
    #[test]
    fn seen_keys_stay_filtered_despite_rewording() {
        let mut ledger = WarningLedger::new();
        let first = warning("W1", "Fetch", "url is empty");
        ledger.mark_seen(std::slice::from_ref(&first));

        let reworded = warning("W1", "Fetch", "the url parameter must be set");
        assert!(ledger.filter_new(&[reworded.clone()]).is_empty());
        assert!(ledger.all_seen(&[reworded]));
    }

    #[test]
    fn filter_new_preserves_input_order() {
        let mut ledger = WarningLedger::new();
        ledger.mark_seen(&[warning("W1", "A", "seen")]);

        let fresh_b = warning("W2", "B", "fresh");
        let fresh_c = warning("W3", "C", "fresh");
        let seen = warning("W1", "A", "seen again");
        let binding = [fresh_b.clone(), seen, fresh_c.clone()];
        let new = ledger.filter_new(&binding);
        assert_eq!(new, vec![&fresh_b, &fresh_c]);
    }

    #[test]
    fn all_seen_is_vacuously_true_for_empty_input() {
        let ledger = WarningLedger::new();
        assert!(ledger.all_seen(&[]));
    }

    #[test]
    fn pre_existing_tags_survive_marking_seen() {
        let mut ledger = WarningLedger::new();
        let baseline = warning("W1", "Legacy", "old problem");
        ledger.mark_pre_existing(std::slice::from_ref(&baseline));
        ledger.mark_seen(std::slice::from_ref(&baseline));

        assert!(ledger.is_pre_existing(&baseline));
        assert!(!ledger.is_pre_existing(&warning("W2", "New", "new problem")));
    }

    /// record keeps the first occurrence; a later sighting does not move it.
    #[test]
    fn record_keeps_first_occurrence_iteration() {
        let mut ledger = WarningLedger::new();
        let w = warning("W1", "Fetch", "m");
        ledger.record(&w, 2);
        ledger.record(&w, 5);

        let timeline = ledger.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].iteration_occurred, 2);
    }

    /// Resolution is write-once: update_resolution_status never overwrites
    /// an existing iteration_resolved.
    #[test]
    fn resolution_iteration_is_never_overwritten() {
        let mut ledger = WarningLedger::new();
        let w = warning("W1", "Fetch", "m");
        ledger.record(&w, 1);
        ledger.update_resolution_status(&[], 3);
        ledger.update_resolution_status(&[], 7);

        assert_eq!(ledger.timeline()[0].iteration_resolved, Some(3));
    }

    #[test]
    fn update_resolution_status_skips_still_present_keys() {
        let mut ledger = WarningLedger::new();
        let gone = warning("W1", "A", "resolved");
        let still = warning("W2", "B", "still here");
        ledger.record(&gone, 1);
        ledger.record(&still, 1);

        ledger.update_resolution_status(std::slice::from_ref(&still), 2);

        let timeline = ledger.timeline();
        let resolved = timeline
            .iter()
            .find(|t| t.warning.code == "W1")
            .expect("tracked");
        let open = timeline
            .iter()
            .find(|t| t.warning.code == "W2")
            .expect("tracked");
        assert_eq!(resolved.iteration_resolved, Some(2));
        assert_eq!(open.iteration_resolved, None);
    }

    #[test]
    fn mark_resolved_keeps_earliest_iteration() {
        let mut ledger = WarningLedger::new();
        let w = warning("W1", "A", "m");
        ledger.record(&w, 1);
        ledger.mark_resolved(&w, 4);
        ledger.mark_resolved(&w, 9);
        assert_eq!(ledger.timeline()[0].iteration_resolved, Some(4));
    }
}
