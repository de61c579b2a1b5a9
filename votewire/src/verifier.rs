use crate::{ReceivedBallot, Result};

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::RwLock;

use log::{info, warn};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;

/// Verifies the integrity and authenticity of received ballots against the
/// signing keys the stations enrolled out-of-band.
///
/// Submissions carry a copy of the station's public key on the wire, but a
/// key that arrives with the message it is supposed to authenticate proves
/// nothing; the verifier only ever consults this map.
pub struct SignatureVerifier {
    station_keys: RwLock<HashMap<String, RsaPublicKey>>,
}

impl SignatureVerifier {
    pub fn new() -> Self {
        SignatureVerifier {
            station_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Install a station's public signing key from a base64 X.509
    /// SubjectPublicKeyInfo. Re-registration replaces: latest wins.
    pub fn register_station_key(&self, station_id: &str, public_key_b64: &str) -> Result<()> {
        let der = base64::decode(public_key_b64)?;
        let key = RsaPublicKey::from_public_key_der(&der)?;

        let mut keys = self.station_keys.write().expect("verifier key map poisoned");
        keys.insert(station_id.to_owned(), key);
        info!("signing key registered for station {}", station_id);
        Ok(())
    }

    pub fn has_station_key(&self, station_id: &str) -> bool {
        let keys = self.station_keys.read().expect("verifier key map poisoned");
        keys.contains_key(station_id)
    }

    /// Verify the ballot's signature over the canonical byte string.
    /// An unknown station or a malformed signature is a plain `false`.
    pub fn verify(&self, ballot: &ReceivedBallot) -> bool {
        let keys = self.station_keys.read().expect("verifier key map poisoned");
        let key = match keys.get(&ballot.station_id) {
            Some(key) => key.clone(),
            None => {
                warn!(
                    "no signing key registered for station {}, rejecting ballot {}",
                    ballot.station_id, ballot.id
                );
                return false;
            }
        };
        drop(keys);

        let signature = match Signature::try_from(ballot.signature.as_slice()) {
            Ok(signature) => signature,
            Err(_) => return false,
        };

        VerifyingKey::<Sha256>::new(key)
            .verify(&ballot.signing_input(), &signature)
            .is_ok()
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ballot, BallotSealer};

    fn received_from(ballot: &Ballot) -> ReceivedBallot {
        ReceivedBallot::new(
            ballot.id,
            &ballot.station_id,
            ballot.emitted_at,
            ballot.sealed_payload.clone(),
            ballot.signature.clone(),
        )
    }

    #[test]
    fn genuine_signature_verifies() {
        let sealer = BallotSealer::new().unwrap();
        let verifier = SignatureVerifier::new();
        verifier
            .register_station_key("M01", &sealer.public_signing_key_base64().unwrap())
            .unwrap();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();
        assert!(verifier.verify(&received_from(&ballot)));
    }

    #[test]
    fn single_bit_flip_fails_verification() {
        let sealer = BallotSealer::new().unwrap();
        let verifier = SignatureVerifier::new();
        verifier
            .register_station_key("M01", &sealer.public_signing_key_base64().unwrap())
            .unwrap();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();

        let mut tampered_payload = received_from(&ballot);
        tampered_payload.sealed_payload[0] ^= 0x01;
        assert!(!verifier.verify(&tampered_payload));

        let mut tampered_signature = received_from(&ballot);
        tampered_signature.signature[0] = tampered_signature.signature[0].wrapping_add(1);
        assert!(!verifier.verify(&tampered_signature));
    }

    #[test]
    fn unknown_station_is_rejected() {
        let sealer = BallotSealer::new().unwrap();
        let verifier = SignatureVerifier::new();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();
        assert!(!verifier.verify(&received_from(&ballot)));
    }

    #[test]
    fn reregistration_replaces_previous_key() {
        let old = BallotSealer::new().unwrap();
        let new = BallotSealer::new().unwrap();
        let verifier = SignatureVerifier::new();

        verifier
            .register_station_key("M01", &old.public_signing_key_base64().unwrap())
            .unwrap();
        verifier
            .register_station_key("M01", &new.public_signing_key_base64().unwrap())
            .unwrap();

        let ballot = new.seal(Ballot::new("M01", "C3")).unwrap();
        assert!(verifier.verify(&received_from(&ballot)));

        let stale = old.seal(Ballot::new("M01", "C3")).unwrap();
        assert!(!verifier.verify(&received_from(&stale)));
    }
}
