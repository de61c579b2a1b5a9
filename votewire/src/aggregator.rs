use crate::ReceivedBallot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use log::warn;

/// Consolidates per-candidate and per-station tallies.
///
/// Writers touch atomic counters only; readers take the read side of the
/// map locks to snapshot. A reader racing a `count` call may observe the
/// totals between the three increments, which is fine for reporting.
pub struct Aggregator {
    by_candidate: RwLock<HashMap<String, AtomicU64>>,
    by_station: RwLock<HashMap<String, AtomicU64>>,
    received_total: AtomicU64,
    counted_total: AtomicU64,
    registered_voters: AtomicU64,
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            by_candidate: RwLock::new(HashMap::new()),
            by_station: RwLock::new(HashMap::new()),
            received_total: AtomicU64::new(0),
            counted_total: AtomicU64::new(0),
            registered_voters: AtomicU64::new(0),
        }
    }

    /// Electorate size, configured out-of-band; used only for turnout.
    pub fn set_registered_voters(&self, total: u64) {
        self.registered_voters.store(total, Ordering::Relaxed);
    }

    /// Called once per submission at pipeline entry, after the dedup pass.
    pub fn increment_received(&self) {
        self.received_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a decrypted ballot: bump its candidate, its station, and the
    /// counted total, and mark the ballot counted. Refuses ballots without
    /// a decrypted candidate.
    pub fn count(&self, ballot: &mut ReceivedBallot) -> bool {
        let candidate_id = match ballot.decrypted_candidate_id.as_deref() {
            Some(candidate) if !candidate.is_empty() => candidate.to_owned(),
            _ => {
                warn!("refusing to count ballot {} without a candidate", ballot.id);
                return false;
            }
        };

        bump(&self.by_candidate, &candidate_id);
        bump(&self.by_station, &ballot.station_id);
        self.counted_total.fetch_add(1, Ordering::Relaxed);

        ballot.counted = true;
        true
    }

    pub fn received_total(&self) -> u64 {
        self.received_total.load(Ordering::Relaxed)
    }

    pub fn counted_total(&self) -> u64 {
        self.counted_total.load(Ordering::Relaxed)
    }

    pub fn results_by_candidate(&self) -> HashMap<String, u64> {
        snapshot(&self.by_candidate)
    }

    pub fn results_by_station(&self) -> HashMap<String, u64> {
        snapshot(&self.by_station)
    }

    pub fn percentages_by_candidate(&self) -> HashMap<String, f64> {
        let map = self.by_candidate.read().expect("aggregator map poisoned");
        let total = self.counted_total.load(Ordering::Relaxed);
        if total == 0 {
            return HashMap::new();
        }
        map.iter()
            .map(|(candidate, votes)| {
                let votes = votes.load(Ordering::Relaxed);
                (candidate.clone(), votes as f64 * 100.0 / total as f64)
            })
            .collect()
    }

    pub fn turnout_percent(&self) -> f64 {
        let registered = self.registered_voters.load(Ordering::Relaxed);
        if registered == 0 {
            return 0.0;
        }
        self.counted_total.load(Ordering::Relaxed) as f64 * 100.0 / registered as f64
    }

    /// Human-readable snapshot for the operator CLI.
    pub fn summary(&self) -> String {
        let results = self.results_by_candidate();
        let percentages = self.percentages_by_candidate();

        let mut lines = String::new();
        lines.push_str("=== TALLY SUMMARY ===\n");
        lines.push_str(&format!("Generated at: {}\n", Utc::now().format("%Y-%m-%dT%H:%M:%S")));
        lines.push_str(&format!(
            "Registered voters: {}\n",
            self.registered_voters.load(Ordering::Relaxed)
        ));
        lines.push_str(&format!("Ballots received: {}\n", self.received_total()));
        lines.push_str(&format!("Ballots counted: {}\n", self.counted_total()));
        lines.push_str(&format!("Turnout: {:.2}%\n", self.turnout_percent()));

        let mut candidates: Vec<_> = results.iter().collect();
        candidates.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (candidate, votes) in candidates {
            let percent = percentages.get(candidate).copied().unwrap_or(0.0);
            lines.push_str(&format!("  {}: {} votes ({:.2}%)\n", candidate, votes, percent));
        }
        lines
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
    {
        let map = map.read().expect("aggregator map poisoned");
        if let Some(counter) = map.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    let mut map = map.write().expect("aggregator map poisoned");
    map.entry(key.to_owned())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn snapshot(map: &RwLock<HashMap<String, AtomicU64>>) -> HashMap<String, u64> {
    let map = map.read().expect("aggregator map poisoned");
    map.iter()
        .map(|(key, counter)| (key.clone(), counter.load(Ordering::Relaxed)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn counted_ballot(station: &str, candidate: &str) -> ReceivedBallot {
        let mut ballot = ReceivedBallot::new(
            Uuid::new_v4(),
            station,
            Utc::now().naive_utc(),
            vec![0; 32],
            vec![0; 256],
        );
        ballot.decrypted_candidate_id = Some(candidate.to_owned());
        ballot.verified = true;
        ballot
    }

    #[test]
    fn counting_bumps_all_three_counters() {
        let aggregator = Aggregator::new();
        aggregator.increment_received();
        let mut ballot = counted_ballot("M01", "C3");
        assert!(aggregator.count(&mut ballot));
        assert!(ballot.counted);

        assert_eq!(aggregator.received_total(), 1);
        assert_eq!(aggregator.counted_total(), 1);
        assert_eq!(aggregator.results_by_candidate().get("C3"), Some(&1));
        assert_eq!(aggregator.results_by_station().get("M01"), Some(&1));
    }

    #[test]
    fn undecrypted_ballot_is_refused() {
        let aggregator = Aggregator::new();
        let mut ballot = counted_ballot("M01", "C3");
        ballot.decrypted_candidate_id = None;
        assert!(!aggregator.count(&mut ballot));
        assert!(!ballot.counted);
        assert_eq!(aggregator.counted_total(), 0);

        ballot.decrypted_candidate_id = Some(String::new());
        assert!(!aggregator.count(&mut ballot));
    }

    #[test]
    fn totals_dominate_per_candidate_sum() {
        let aggregator = Aggregator::new();
        for i in 0..30 {
            aggregator.increment_received();
            let mut ballot = counted_ballot("M01", if i % 3 == 0 { "C1" } else { "C2" });
            aggregator.count(&mut ballot);
        }
        let by_candidate: u64 = aggregator.results_by_candidate().values().sum();
        assert!(aggregator.received_total() >= aggregator.counted_total());
        assert_eq!(aggregator.counted_total(), by_candidate);
    }

    #[test]
    fn percentages_and_turnout() {
        let aggregator = Aggregator::new();
        aggregator.set_registered_voters(200);
        for _ in 0..50 {
            aggregator.increment_received();
            aggregator.count(&mut counted_ballot("M01", "C1"));
        }
        for _ in 0..50 {
            aggregator.increment_received();
            aggregator.count(&mut counted_ballot("M02", "C2"));
        }

        let percentages = aggregator.percentages_by_candidate();
        assert!((percentages["C1"] - 50.0).abs() < f64::EPSILON);
        assert!((aggregator.turnout_percent() - 50.0).abs() < f64::EPSILON);
    }
}
