use crate::audit::{AuditJournal, AuditRecord};
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::scheduler::{spawn_periodic, PeriodicTask};
use crate::{Ballot, BallotReceiver, Outbox, Result, SubmitBallotRequest};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

/// What the caller of a submission sees. Everything except `Acknowledged`
/// leaves the ballot pending in the outbox for the retry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The tallier acked `true`: durably deduplicated and counted.
    Acknowledged,
    /// The tallier acked `false`: some pipeline stage refused the ballot.
    Rejected,
    /// The wire itself failed; the breaker counted the failure.
    TransportFailed,
    /// The breaker is open; the ballot was stored without touching the wire.
    Deferred,
}

/// Retry-sweep timing. Production defaults; tests compress them.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(60),
        }
    }
}

/// Drives the outbox against the tallier RPC with bounded-loss delivery.
///
/// The transmitter owns the circuit breaker and pulls pending entries
/// from the outbox it was given; the outbox never calls back into it.
pub struct Transmitter {
    receiver: Arc<dyn BallotReceiver>,
    outbox: Arc<Outbox>,
    journal: Arc<AuditJournal>,
    station_pubkey_b64: String,
    breaker: Mutex<CircuitBreaker>,
}

impl Transmitter {
    pub fn new(
        receiver: Arc<dyn BallotReceiver>,
        outbox: Arc<Outbox>,
        journal: Arc<AuditJournal>,
        station_pubkey_b64: String,
        breaker_config: BreakerConfig,
    ) -> Self {
        Transmitter {
            receiver,
            outbox,
            journal,
            station_pubkey_b64,
            breaker: Mutex::new(CircuitBreaker::new(breaker_config)),
        }
    }

    /// Submit one sealed ballot. The ballot is stored in the outbox before
    /// any wire activity, so no outcome can lose it.
    pub fn submit(&self, ballot: &Ballot) -> Result<SubmitOutcome> {
        if !self.outbox.contains(ballot.id) {
            self.outbox.append(ballot)?;
        }

        {
            let mut breaker = self.breaker.lock().expect("breaker poisoned");
            if !breaker.call_permitted() {
                info!("circuit open, deferring ballot {}", ballot.id);
                return Ok(SubmitOutcome::Deferred);
            }
        }

        let request = SubmitBallotRequest::from_ballot(ballot, &self.station_pubkey_b64);
        match self.receiver.submit_ballot(&request) {
            Ok(true) => {
                self.breaker.lock().expect("breaker poisoned").record_success();
                self.outbox.mark_acknowledged(ballot.id);
                self.journal.record(&AuditRecord::Transmission {
                    ballot_id: request.ballot_id,
                    station_id: request.station_id,
                    success: true,
                });
                Ok(SubmitOutcome::Acknowledged)
            }
            Ok(false) => {
                warn!("tallier refused ballot {}", ballot.id);
                self.journal.record(&AuditRecord::Transmission {
                    ballot_id: request.ballot_id,
                    station_id: request.station_id,
                    success: false,
                });
                Ok(SubmitOutcome::Rejected)
            }
            Err(e) => {
                warn!("transport failure submitting ballot {}: {}", ballot.id, e);
                self.breaker.lock().expect("breaker poisoned").record_failure();
                self.journal.record(&AuditRecord::Transmission {
                    ballot_id: request.ballot_id,
                    station_id: request.station_id,
                    success: false,
                });
                Ok(SubmitOutcome::TransportFailed)
            }
        }
    }

    /// Resubmit every pending ballot while the breaker stays closed;
    /// aborts as soon as it opens. Returns how many were acknowledged.
    pub fn sweep_pending(&self) -> usize {
        if self.breaker.lock().expect("breaker poisoned").is_open() {
            info!("circuit open, postponing retry sweep");
            return 0;
        }

        let pending = self.outbox.list_pending();
        if pending.is_empty() {
            return 0;
        }
        info!("retransmitting {} pending ballots", pending.len());

        let mut delivered = 0;
        for ballot in pending {
            match self.submit(&ballot) {
                Ok(SubmitOutcome::Acknowledged) => delivered += 1,
                Ok(SubmitOutcome::Rejected) => {}
                Ok(SubmitOutcome::TransportFailed) | Ok(SubmitOutcome::Deferred) => {
                    if self.breaker.lock().expect("breaker poisoned").is_open() {
                        info!("circuit opened during retry sweep, stopping");
                        break;
                    }
                }
                Err(e) => warn!("retry sweep could not submit: {}", e),
            }
        }
        delivered
    }

    pub fn breaker_is_open(&self) -> bool {
        self.breaker.lock().expect("breaker poisoned").is_open()
    }

    /// Start the background retry sweep. The returned task stops and joins
    /// the thread on drop.
    pub fn start_retry_sweep(self: &Arc<Self>, config: RetryConfig) -> PeriodicTask {
        let transmitter = Arc::clone(self);
        spawn_periodic("retry-sweep", config.initial_delay, config.interval, move || {
            transmitter.sweep_pending();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BallotSealer, Error};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Receiver that can be taken offline; counts wire attempts.
    struct FlakyReceiver {
        online: AtomicBool,
        attempts: AtomicUsize,
    }

    impl FlakyReceiver {
        fn new(online: bool) -> Self {
            FlakyReceiver {
                online: AtomicBool::new(online),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    impl BallotReceiver for FlakyReceiver {
        fn submit_ballot(&self, _request: &SubmitBallotRequest) -> Result<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.online.load(Ordering::SeqCst) {
                Ok(true)
            } else {
                Err(Error::BadEndpoint("connection refused".into()))
            }
        }

        fn ping(&self) -> Result<bool> {
            Ok(self.online.load(Ordering::SeqCst))
        }

        fn fetch_server_public_key(&self) -> Result<String> {
            Ok(String::new())
        }
    }

    fn fixture(
        online: bool,
        backoff: Duration,
    ) -> (Arc<FlakyReceiver>, Arc<Outbox>, Transmitter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let receiver = Arc::new(FlakyReceiver::new(online));
        let outbox = Arc::new(Outbox::new(dir.path().join("outbox")).unwrap());
        let journal = Arc::new(AuditJournal::new(dir.path().join("logs"), "votacion"));
        let transmitter = Transmitter::new(
            Arc::clone(&receiver) as Arc<dyn BallotReceiver>,
            Arc::clone(&outbox),
            journal,
            "PUBKEY".into(),
            BreakerConfig {
                failure_threshold: 3,
                initial_backoff: backoff,
                max_backoff: backoff * 8,
            },
        );
        (receiver, outbox, transmitter, dir)
    }

    #[test]
    fn acknowledged_ballot_leaves_pending() {
        let sealer = BallotSealer::new().unwrap();
        let (_receiver, outbox, transmitter, _dir) = fixture(true, Duration::from_secs(5));

        let ballot = sealer.seal(Ballot::new("M01", "C1")).unwrap();
        assert_eq!(
            transmitter.submit(&ballot).unwrap(),
            SubmitOutcome::Acknowledged
        );
        assert!(outbox.list_pending().is_empty());
        assert_eq!(outbox.list_acknowledged().len(), 1);
    }

    #[test]
    fn breaker_opens_after_threshold_and_skips_the_wire() {
        let sealer = BallotSealer::new().unwrap();
        let (receiver, outbox, transmitter, _dir) = fixture(false, Duration::from_secs(30));

        for _ in 0..3 {
            let ballot = sealer.seal(Ballot::new("M01", "C1")).unwrap();
            assert_eq!(
                transmitter.submit(&ballot).unwrap(),
                SubmitOutcome::TransportFailed
            );
        }
        assert!(transmitter.breaker_is_open());

        let fourth = sealer.seal(Ballot::new("M01", "C1")).unwrap();
        assert_eq!(transmitter.submit(&fourth).unwrap(), SubmitOutcome::Deferred);
        assert_eq!(receiver.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(outbox.list_pending().len(), 4);
    }

    #[test]
    fn sweep_delivers_backlog_once_tallier_returns() {
        let sealer = BallotSealer::new().unwrap();
        let (receiver, outbox, transmitter, _dir) = fixture(false, Duration::from_millis(30));

        for _ in 0..3 {
            let ballot = sealer.seal(Ballot::new("M01", "C1")).unwrap();
            transmitter.submit(&ballot).unwrap();
        }
        assert!(transmitter.breaker_is_open());
        assert_eq!(transmitter.sweep_pending(), 0);

        std::thread::sleep(Duration::from_millis(50));
        receiver.online.store(true, Ordering::SeqCst);
        assert_eq!(transmitter.sweep_pending(), 3);
        assert!(outbox.list_pending().is_empty());
    }

    #[test]
    fn sweep_aborts_when_breaker_opens_mid_sweep() {
        let sealer = BallotSealer::new().unwrap();
        let (receiver, outbox, transmitter, _dir) = fixture(true, Duration::from_secs(30));

        for _ in 0..5 {
            let ballot = sealer.seal(Ballot::new("M01", "C1")).unwrap();
            outbox.append(&ballot).unwrap();
        }
        receiver.online.store(false, Ordering::SeqCst);

        assert_eq!(transmitter.sweep_pending(), 0);
        // threshold is 3: the sweep stopped without trying all five
        assert_eq!(receiver.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(outbox.list_pending().len(), 5);
    }
}
