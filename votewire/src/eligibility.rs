use crate::audit::{AuditJournal, AuditRecord};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// A registered voter as known to the station.
///
/// This record never travels with a ballot: the station consults it for
/// the eligibility decision and then discards the association.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Voter {
    pub document: String,
    pub full_name: String,
    pub assigned_station: String,
    pub has_voted: bool,
    pub disqualified: bool,
}

impl Voter {
    pub fn new(document: &str, full_name: &str, assigned_station: &str) -> Self {
        Voter {
            document: document.to_owned(),
            full_name: full_name.to_owned(),
            assigned_station: assigned_station.to_owned(),
            has_voted: false,
            disqualified: false,
        }
    }
}

/// Why a voter was refused. The reason string is what lands in the
/// INTENTO_FRAUDE journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Disqualified,
    WrongStation { assigned: String },
    AlreadyVotedLocally,
    AlreadyVotedElsewhere,
}

impl Refusal {
    pub fn reason(&self) -> String {
        match self {
            Refusal::Disqualified => "Votante con antecedentes criminales".to_owned(),
            Refusal::WrongStation { assigned } => {
                format!("Votante asignado a la mesa {}", assigned)
            }
            Refusal::AlreadyVotedLocally => "Votante ya ha votado".to_owned(),
            Refusal::AlreadyVotedElsewhere => "Votante ya ha votado en otra mesa".to_owned(),
        }
    }
}

/// Answers "may this voter vote here, now?" and keeps the global
/// has-voted set. Refusals are journalled as fraud attempts before being
/// reported to the caller; the rest of the station trusts the answer.
pub struct VoterRegistry {
    voted: Mutex<HashSet<String>>,
    journal: Arc<AuditJournal>,
}

impl VoterRegistry {
    pub fn new(journal: Arc<AuditJournal>) -> Self {
        VoterRegistry {
            voted: Mutex::new(HashSet::new()),
            journal,
        }
    }

    pub fn check(&self, voter: &Voter, station_id: &str) -> Result<(), Refusal> {
        let refusal = if voter.disqualified {
            Some(Refusal::Disqualified)
        } else if voter.assigned_station != station_id {
            Some(Refusal::WrongStation {
                assigned: voter.assigned_station.clone(),
            })
        } else if voter.has_voted {
            Some(Refusal::AlreadyVotedLocally)
        } else if self
            .voted
            .lock()
            .expect("voter registry poisoned")
            .contains(&voter.document)
        {
            Some(Refusal::AlreadyVotedElsewhere)
        } else {
            None
        };

        match refusal {
            Some(refusal) => {
                self.journal.record(&AuditRecord::FraudAttempt {
                    station_id: station_id.to_owned(),
                    document: voter.document.clone(),
                    reason: refusal.reason(),
                });
                Err(refusal)
            }
            None => Ok(()),
        }
    }

    pub fn mark_voted(&self, document: &str) {
        self.voted
            .lock()
            .expect("voter registry poisoned")
            .insert(document.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (VoterRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(AuditJournal::new(dir.path(), "votacion"));
        (VoterRegistry::new(journal), dir)
    }

    #[test]
    fn eligible_voter_passes() {
        let (registry, _dir) = registry();
        let voter = Voter::new("12345678", "Ada Lovelace", "M01");
        assert!(registry.check(&voter, "M01").is_ok());
    }

    #[test]
    fn refusals_in_priority_order() {
        let (registry, _dir) = registry();

        let mut voter = Voter::new("12345678", "Ada Lovelace", "M01");
        voter.disqualified = true;
        assert_eq!(registry.check(&voter, "M01"), Err(Refusal::Disqualified));

        let voter = Voter::new("12345678", "Ada Lovelace", "M02");
        assert_eq!(
            registry.check(&voter, "M01"),
            Err(Refusal::WrongStation {
                assigned: "M02".into()
            })
        );

        let mut voter = Voter::new("12345678", "Ada Lovelace", "M01");
        voter.has_voted = true;
        assert_eq!(registry.check(&voter, "M01"), Err(Refusal::AlreadyVotedLocally));
    }

    #[test]
    fn double_voting_across_stations_is_refused() {
        let (registry, dir) = registry();
        let voter = Voter::new("12345678", "Ada Lovelace", "M01");

        assert!(registry.check(&voter, "M01").is_ok());
        registry.mark_voted(&voter.document);
        assert_eq!(
            registry.check(&voter, "M01"),
            Err(Refusal::AlreadyVotedElsewhere)
        );

        let journal = AuditJournal::new(dir.path(), "votacion");
        let contents = std::fs::read_to_string(journal.current_file()).unwrap();
        assert!(contents.contains("INTENTO_FRAUDE|M01|XXXX5678|Votante ya ha votado en otra mesa"));
    }
}
