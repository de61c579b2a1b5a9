use crate::audit::{AuditJournal, AuditRecord};
use crate::scheduler::{spawn_periodic, PeriodicTask};
use crate::transmitter::RetryConfig;
use crate::{
    Ballot, BallotSealer, Error, Outbox, Result, SubmitOutcome, Transmitter, Voter, VoterRegistry,
};

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

const PERSISTENCE_INITIAL_DELAY: Duration = Duration::from_secs(30);
const PERSISTENCE_INTERVAL: Duration = Duration::from_secs(60);

/// A polling station: eligibility check, ballot factory, sealer, outbox
/// and transmitter wired together as ordinary values.
///
/// `cast_vote` is the one entry point: the voter's identity is consumed by
/// the eligibility decision and the has-voted ledger, and the ballot that
/// leaves the factory carries only the station id and the candidate.
pub struct Station {
    station_id: String,
    sealer: BallotSealer,
    outbox: Arc<Outbox>,
    transmitter: Arc<Transmitter>,
    registry: Arc<VoterRegistry>,
    journal: Arc<AuditJournal>,
    background: Vec<PeriodicTask>,
}

impl Station {
    pub fn new(
        station_id: &str,
        sealer: BallotSealer,
        outbox: Arc<Outbox>,
        transmitter: Arc<Transmitter>,
        registry: Arc<VoterRegistry>,
        journal: Arc<AuditJournal>,
    ) -> Self {
        Station {
            station_id: station_id.to_owned(),
            sealer,
            outbox,
            transmitter,
            registry,
            journal,
            background: Vec::new(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn sealer(&self) -> &BallotSealer {
        &self.sealer
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn transmitter(&self) -> &Arc<Transmitter> {
        &self.transmitter
    }

    /// Check the voter, seal a ballot for the candidate, store it durably
    /// and hand it to the transmitter.
    ///
    /// The vote attempt is journalled EXITOSO once the sealed ballot is in
    /// the outbox: from then on delivery is the pipeline's responsibility,
    /// whatever the immediate wire outcome.
    pub fn cast_vote(&self, voter: &Voter, candidate_id: &str) -> Result<SubmitOutcome> {
        if let Err(refusal) = self.registry.check(voter, &self.station_id) {
            warn!(
                "vote attempt refused at station {}: {}",
                self.station_id,
                refusal.reason()
            );
            self.journal.record(&AuditRecord::VoteAttempt {
                station_id: self.station_id.clone(),
                document: voter.document.clone(),
                success: false,
            });
            return Err(Error::VoterIneligible(refusal.reason()));
        }

        let ballot = Ballot::new(&self.station_id, candidate_id);
        let sealed = match self.sealer.seal(ballot).and_then(|b| {
            self.outbox.append(&b)?;
            Ok(b)
        }) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.journal.record(&AuditRecord::VoteAttempt {
                    station_id: self.station_id.clone(),
                    document: voter.document.clone(),
                    success: false,
                });
                return Err(e);
            }
        };

        self.registry.mark_voted(&voter.document);
        self.journal.record(&AuditRecord::VoteAttempt {
            station_id: self.station_id.clone(),
            document: voter.document.clone(),
            success: true,
        });
        info!("ballot {} cast at station {}", sealed.id, self.station_id);

        self.transmitter.submit(&sealed)
    }

    /// Rehydrate the outbox and start the background threads: the retry
    /// sweep and the periodic outbox re-persistence.
    pub fn start(&mut self, retry: RetryConfig) -> Result<usize> {
        let recovered = self.outbox.recover()?;

        self.background.push(self.transmitter.start_retry_sweep(retry));

        let outbox = Arc::clone(&self.outbox);
        self.background.push(spawn_periodic(
            "outbox-persistence",
            PERSISTENCE_INITIAL_DELAY,
            PERSISTENCE_INTERVAL,
            move || outbox.persist_all(),
        ));

        Ok(recovered)
    }

    /// Stop and join the background threads; pending ballots stay on disk
    /// for the next start.
    pub fn shutdown(&mut self) {
        for task in self.background.drain(..) {
            task.stop();
        }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::{AuditJournal, BallotReceiver, LocalReceiver, TallyPipeline};

    fn station_against_local_pipeline() -> (Station, Arc<TallyPipeline>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(
            TallyPipeline::new(AuditJournal::new(dir.path().join("server_logs"), "servidor"))
                .unwrap(),
        );

        let sealer = BallotSealer::new().unwrap();
        pipeline
            .register_station_signing_key("M01", &sealer.public_signing_key_base64().unwrap())
            .unwrap();
        let wrapped = sealer
            .wrap_symmetric_key_for(&pipeline.server_public_key_base64().unwrap())
            .unwrap();
        pipeline.register_station_aes_key("M01", &wrapped).unwrap();

        let journal = Arc::new(AuditJournal::new(dir.path().join("station_logs"), "votacion"));
        let outbox = Arc::new(Outbox::new(dir.path().join("outbox")).unwrap());
        let receiver: Arc<dyn BallotReceiver> =
            Arc::new(LocalReceiver::new(Arc::clone(&pipeline)));
        let transmitter = Arc::new(Transmitter::new(
            receiver,
            Arc::clone(&outbox),
            Arc::clone(&journal),
            sealer.public_signing_key_base64().unwrap(),
            BreakerConfig::default(),
        ));
        let registry = Arc::new(VoterRegistry::new(Arc::clone(&journal)));

        let station = Station::new("M01", sealer, outbox, transmitter, registry, journal);
        (station, pipeline, dir)
    }

    #[test]
    fn eligible_voter_casts_and_is_counted() {
        let (station, pipeline, _dir) = station_against_local_pipeline();

        let voter = Voter::new("12345678", "Ada Lovelace", "M01");
        let outcome = station.cast_vote(&voter, "C3").unwrap();
        assert_eq!(outcome, SubmitOutcome::Acknowledged);
        assert_eq!(
            pipeline.aggregator().results_by_candidate().get("C3"),
            Some(&1)
        );
    }

    #[test]
    fn same_voter_cannot_cast_twice() {
        let (station, pipeline, _dir) = station_against_local_pipeline();

        let voter = Voter::new("12345678", "Ada Lovelace", "M01");
        station.cast_vote(&voter, "C3").unwrap();
        assert!(matches!(
            station.cast_vote(&voter, "C3"),
            Err(Error::VoterIneligible(_))
        ));
        assert_eq!(pipeline.aggregator().counted_total(), 1);
    }

    #[test]
    fn refused_voter_leaves_no_ballot() {
        let (station, pipeline, _dir) = station_against_local_pipeline();

        let mut voter = Voter::new("12345678", "Ada Lovelace", "M01");
        voter.disqualified = true;
        assert!(station.cast_vote(&voter, "C3").is_err());
        assert!(station.outbox().list_pending().is_empty());
        assert_eq!(pipeline.aggregator().received_total(), 0);
    }
}
