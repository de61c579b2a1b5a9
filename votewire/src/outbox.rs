use crate::{Ballot, Result};

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{Duration, Utc};
use log::{info, warn};
use uuid::Uuid;

const BALLOT_EXTENSION: &str = "ballot";
const TRANSMITTED_LOG: &str = "votos_transmitidos.log";

/// Durable at-least-once delivery buffer for sealed ballots.
///
/// Every appended ballot lives both in the in-memory map and as a
/// `<id>.ballot` JSON file under the configured directory. The fsync on
/// append is the durability boundary: once `append` returns Ok, the ballot
/// survives a crash. Acknowledged state is in-memory only; recovery
/// rehydrates every file as pending and relies on the tallier's dedup set
/// to absorb the re-sends.
pub struct Outbox {
    directory: PathBuf,
    entries: RwLock<HashMap<Uuid, OutboxEntry>>,
}

#[derive(Clone)]
struct OutboxEntry {
    ballot: Ballot,
    acknowledged: bool,
}

impl Outbox {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        std::fs::create_dir_all(directory.as_ref())?;
        Ok(Outbox {
            directory: directory.as_ref().to_owned(),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Insert as pending and persist to disk before returning success.
    pub fn append(&self, ballot: &Ballot) -> Result<()> {
        self.persist(ballot)?;
        let mut entries = self.entries.write().expect("outbox poisoned");
        entries.insert(
            ballot.id,
            OutboxEntry {
                ballot: ballot.clone(),
                acknowledged: false,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.read().expect("outbox poisoned").contains_key(&id)
    }

    /// Transition to acknowledged and append the transmission line to
    /// `votos_transmitidos.log`. Returns false for unknown ids.
    pub fn mark_acknowledged(&self, id: Uuid) -> bool {
        let line = {
            let mut entries = self.entries.write().expect("outbox poisoned");
            match entries.get_mut(&id) {
                Some(entry) => {
                    entry.acknowledged = true;
                    format!(
                        "{}|{}|{}|{}",
                        Utc::now().format("%Y-%m-%dT%H:%M:%S"),
                        entry.ballot.id,
                        entry.ballot.station_id,
                        entry.ballot.emitted_at_string()
                    )
                }
                None => {
                    warn!("tried to acknowledge unknown ballot {}", id);
                    return false;
                }
            }
        };
        if let Err(e) = self.append_transmitted_line(&line) {
            warn!("could not record transmitted ballot {}: {}", id, e);
        }
        true
    }

    /// Demote back to pending so the retry sweep picks the ballot up again.
    pub fn mark_pending(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write().expect("outbox poisoned");
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.acknowledged = false;
                true
            }
            None => {
                warn!("tried to demote unknown ballot {}", id);
                false
            }
        }
    }

    pub fn list_pending(&self) -> Vec<Ballot> {
        let entries = self.entries.read().expect("outbox poisoned");
        entries
            .values()
            .filter(|entry| !entry.acknowledged)
            .map(|entry| entry.ballot.clone())
            .collect()
    }

    pub fn list_acknowledged(&self) -> Vec<Ballot> {
        let entries = self.entries.read().expect("outbox poisoned");
        entries
            .values()
            .filter(|entry| entry.acknowledged)
            .map(|entry| entry.ballot.clone())
            .collect()
    }

    /// Scan the directory and rehydrate every ballot file as pending,
    /// regardless of its state before the restart. Unreadable files are
    /// skipped with a warning. Returns the number recovered.
    pub fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BALLOT_EXTENSION) {
                continue;
            }
            let ballot: Ballot = match File::open(&path).map_err(crate::Error::from).and_then(|f| {
                serde_json::from_reader(f).map_err(crate::Error::from)
            }) {
                Ok(ballot) => ballot,
                Err(e) => {
                    warn!("skipping unreadable ballot file {}: {}", path.display(), e);
                    continue;
                }
            };
            let mut entries = self.entries.write().expect("outbox poisoned");
            entries.insert(
                ballot.id,
                OutboxEntry {
                    ballot,
                    acknowledged: false,
                },
            );
            recovered += 1;
        }
        info!("outbox recovered {} pending ballots", recovered);
        Ok(recovered)
    }

    /// Delete acknowledged ballots emitted more than `age` ago, both from
    /// memory and from disk. Returns the number removed.
    pub fn prune(&self, age: Duration) -> usize {
        let cutoff = Utc::now().naive_utc() - age;
        let stale: Vec<Uuid> = {
            let entries = self.entries.read().expect("outbox poisoned");
            entries
                .values()
                .filter(|entry| entry.acknowledged && entry.ballot.emitted_at < cutoff)
                .map(|entry| entry.ballot.id)
                .collect()
        };

        let mut removed = 0;
        for id in stale {
            {
                let mut entries = self.entries.write().expect("outbox poisoned");
                entries.remove(&id);
            }
            if let Err(e) = std::fs::remove_file(self.ballot_path(id)) {
                warn!("could not delete ballot file for {}: {}", id, e);
            }
            removed += 1;
        }
        if removed > 0 {
            info!("outbox pruned {} acknowledged ballots", removed);
        }
        removed
    }

    /// Re-persist every held ballot; run periodically as a safety net for
    /// files lost underneath us.
    pub fn persist_all(&self) {
        let ballots: Vec<Ballot> = {
            let entries = self.entries.read().expect("outbox poisoned");
            entries.values().map(|entry| entry.ballot.clone()).collect()
        };
        for ballot in &ballots {
            if let Err(e) = self.persist(ballot) {
                warn!("could not persist ballot {}: {}", ballot.id, e);
            }
        }
    }

    fn ballot_path(&self, id: Uuid) -> PathBuf {
        self.directory.join(format!("{}.{}", id, BALLOT_EXTENSION))
    }

    fn persist(&self, ballot: &Ballot) -> Result<()> {
        let path = self.ballot_path(ballot.id);
        let mut file = File::create(&path)?;
        serde_json::to_writer(&mut file, ballot)?;
        file.sync_all()?;
        Ok(())
    }

    fn append_transmitted_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join(TRANSMITTED_LOG))?;
        writeln!(file, "{}", line)
    }
}
