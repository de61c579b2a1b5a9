use crate::audit::{AuditJournal, AuditRecord};
use crate::ballot::parse_timestamp;
use crate::{
    Aggregator, BallotDecryptor, ReceivedBallot, ReplayDetector, Result, SignatureVerifier,
    SubmitBallotRequest,
};

use log::{info, warn};
use uuid::Uuid;

/// The tallier's intake pipeline.
///
/// Every submission runs the fixed stage order replay detector →
/// signature verifier → decryptor → aggregator, with the audit journal
/// recording each decision. Any stage may short-circuit with a `false`
/// ack; only successful aggregation acks `true`, and by then the id is in
/// the dedup set, so a re-send of the same ballot can never count twice.
///
/// Station keys are enrolled out-of-band before the first submission; the
/// key material carried inside a submission is never installed.
pub struct TallyPipeline {
    detector: ReplayDetector,
    verifier: SignatureVerifier,
    decryptor: BallotDecryptor,
    aggregator: Aggregator,
    journal: AuditJournal,
}

impl TallyPipeline {
    /// Fails only if the tallier keypair cannot be generated, which is
    /// fatal at startup.
    pub fn new(journal: AuditJournal) -> Result<Self> {
        Ok(TallyPipeline {
            detector: ReplayDetector::new(),
            verifier: SignatureVerifier::new(),
            decryptor: BallotDecryptor::new()?,
            aggregator: Aggregator::new(),
            journal,
        })
    }

    /// Process one submission to completion and return the ack.
    pub fn receive(&self, request: &SubmitBallotRequest) -> bool {
        info!(
            "receiving ballot {} from station {}",
            request.ballot_id, request.station_id
        );

        let id = match Uuid::parse_str(&request.ballot_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("unparseable ballot id {:?}: {}", request.ballot_id, e);
                self.journal.record(&AuditRecord::Reception {
                    ballot_id: request.ballot_id.clone(),
                    station_id: request.station_id.clone(),
                    success: false,
                });
                return false;
            }
        };
        let emitted_at = match parse_timestamp(&request.emitted_at) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("unparseable timestamp {:?}: {}", request.emitted_at, e);
                self.journal.record(&AuditRecord::Reception {
                    ballot_id: request.ballot_id.clone(),
                    station_id: request.station_id.clone(),
                    success: false,
                });
                return false;
            }
        };

        if !self.detector.check_and_register(id) {
            warn!("duplicate ballot {} from station {}", id, request.station_id);
            self.journal.record(&AuditRecord::Duplicate {
                ballot_id: request.ballot_id.clone(),
                station_id: request.station_id.clone(),
            });
            return false;
        }

        self.aggregator.increment_received();

        let mut ballot = ReceivedBallot::new(
            id,
            &request.station_id,
            emitted_at,
            request.sealed_payload.clone(),
            request.signature.clone(),
        );

        if !self.verifier.verify(&ballot) {
            warn!("signature verification failed for ballot {}", id);
            self.journal.record(&AuditRecord::Verification {
                ballot_id: request.ballot_id.clone(),
                station_id: request.station_id.clone(),
                success: false,
            });
            return false;
        }
        ballot.verified = true;
        self.journal.record(&AuditRecord::Verification {
            ballot_id: request.ballot_id.clone(),
            station_id: request.station_id.clone(),
            success: true,
        });

        if let Err(e) = self.decryptor.decrypt(&mut ballot) {
            warn!("decryption failed for ballot {}: {}", id, e);
            self.journal.record(&AuditRecord::Verification {
                ballot_id: request.ballot_id.clone(),
                station_id: request.station_id.clone(),
                success: false,
            });
            return false;
        }

        let counted = self.aggregator.count(&mut ballot);
        if counted {
            self.journal.record(&AuditRecord::Tally {
                ballot_id: request.ballot_id.clone(),
                station_id: request.station_id.clone(),
                candidate_id: ballot
                    .decrypted_candidate_id
                    .clone()
                    .unwrap_or_default(),
            });
        }
        self.journal.record(&AuditRecord::Reception {
            ballot_id: request.ballot_id.clone(),
            station_id: request.station_id.clone(),
            success: counted,
        });

        counted
    }

    /// Out-of-band enrolment of a station's public signing key.
    pub fn register_station_signing_key(
        &self,
        station_id: &str,
        public_key_b64: &str,
    ) -> Result<()> {
        self.verifier.register_station_key(station_id, public_key_b64)
    }

    /// Out-of-band delivery of a station's AES key, wrapped under the
    /// tallier's public key.
    pub fn register_station_aes_key(&self, station_id: &str, wrapped_key_b64: &str) -> Result<()> {
        self.decryptor.register_station_key(station_id, wrapped_key_b64)
    }

    /// The tallier's public key (base64 SPKI) for stations to wrap their
    /// AES keys under.
    pub fn server_public_key_base64(&self) -> Result<String> {
        self.decryptor.public_key_base64()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn detector(&self) -> &ReplayDetector {
        &self.detector
    }

    pub fn journal(&self) -> &AuditJournal {
        &self.journal
    }
}
