use crate::sealer::{split_sealed_payload, AES_KEY_LENGTH};
use crate::{Error, ReceivedBallot, Result};

use std::collections::HashMap;
use std::sync::RwLock;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use log::info;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const RSA_BITS: usize = 2048;

/// Tallier-side decryptor.
///
/// Owns the tallier RSA keypair whose public half is published to stations.
/// Each station delivers its AES key wrapped under that public key once, at
/// session start; thereafter this component can open that station's sealed
/// payloads.
pub struct BallotDecryptor {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    station_keys: RwLock<HashMap<String, [u8; AES_KEY_LENGTH]>>,
}

impl BallotDecryptor {
    pub fn new() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(BallotDecryptor {
            private_key,
            public_key,
            station_keys: RwLock::new(HashMap::new()),
        })
    }

    /// The tallier's public key as a base64 X.509 SubjectPublicKeyInfo,
    /// published so stations can wrap their AES keys for delivery.
    pub fn public_key_base64(&self) -> Result<String> {
        let der = self.public_key.to_public_key_der()?;
        Ok(base64::encode(der.as_bytes()))
    }

    /// Unwrap and install a station's AES key. Replacement is atomic;
    /// latest wins.
    pub fn register_station_key(&self, station_id: &str, wrapped_key_b64: &str) -> Result<()> {
        let wrapped = base64::decode(wrapped_key_b64)?;
        let key_bytes = self.private_key.decrypt(Pkcs1v15Encrypt, &wrapped)?;
        if key_bytes.len() != AES_KEY_LENGTH {
            return Err(Error::SymmetricKeyLength(key_bytes.len()));
        }

        let mut key = [0u8; AES_KEY_LENGTH];
        key.copy_from_slice(&key_bytes);

        let mut keys = self.station_keys.write().expect("decryptor key map poisoned");
        keys.insert(station_id.to_owned(), key);
        info!("symmetric key registered for station {}", station_id);
        Ok(())
    }

    pub fn has_station_key(&self, station_id: &str) -> bool {
        let keys = self.station_keys.read().expect("decryptor key map poisoned");
        keys.contains_key(station_id)
    }

    /// Split the sealed payload into IV and ciphertext, decrypt with the
    /// station's AES key, and install the UTF-8 plaintext as
    /// `decrypted_candidate_id`. Any failure rejects the ballot.
    pub fn decrypt(&self, ballot: &mut ReceivedBallot) -> Result<()> {
        let key = {
            let keys = self.station_keys.read().expect("decryptor key map poisoned");
            *keys
                .get(&ballot.station_id)
                .ok_or_else(|| Error::UnknownStation(ballot.station_id.clone()))?
        };

        let (iv, ciphertext) = split_sealed_payload(&ballot.sealed_payload)?;
        let plain = Aes256CbcDec::new_from_slices(&key, iv)
            .map_err(|_| Error::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;

        let candidate_id = String::from_utf8(plain).map_err(|_| Error::DecryptionFailed)?;
        ballot.decrypted_candidate_id = Some(candidate_id);
        Ok(())
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
    fn wrapped_key_round_trip_recovers_candidate() {
        let sealer = BallotSealer::new().unwrap();
        let decryptor = BallotDecryptor::new().unwrap();

        let wrapped = sealer
            .wrap_symmetric_key_for(&decryptor.public_key_base64().unwrap())
            .unwrap();
        decryptor.register_station_key("M01", &wrapped).unwrap();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();
        let mut received = received_from(&ballot);
        decryptor.decrypt(&mut received).unwrap();
        assert_eq!(received.decrypted_candidate_id.as_deref(), Some("C3"));
    }

    #[test]
    fn unknown_station_key_is_rejected() {
        let sealer = BallotSealer::new().unwrap();
        let decryptor = BallotDecryptor::new().unwrap();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();
        let mut received = received_from(&ballot);
        assert!(matches!(
            decryptor.decrypt(&mut received),
            Err(Error::UnknownStation(_))
        ));
    }

    #[test]
    fn corrupted_ciphertext_fails_padding() {
        let sealer = BallotSealer::new().unwrap();
        let decryptor = BallotDecryptor::new().unwrap();
        let wrapped = sealer
            .wrap_symmetric_key_for(&decryptor.public_key_base64().unwrap())
            .unwrap();
        decryptor.register_station_key("M01", &wrapped).unwrap();

        let ballot = sealer.seal(Ballot::new("M01", "C3")).unwrap();
        let mut received = received_from(&ballot);
        let last = received.sealed_payload.len() - 1;
        received.sealed_payload[last] ^= 0xFF;
        assert!(decryptor.decrypt(&mut received).is_err());
    }

    #[test]
    fn wrong_length_wrapped_key_is_rejected() {
        use rsa::pkcs8::DecodePublicKey;

        let decryptor = BallotDecryptor::new().unwrap();
        // Wrapping 16 bytes instead of 32 under the tallier's public key
        let der = base64::decode(decryptor.public_key_base64().unwrap()).unwrap();
        let public = RsaPublicKey::from_public_key_der(&der).unwrap();
        let wrapped = public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &[0u8; 16])
            .unwrap();
        assert!(matches!(
            decryptor.register_station_key("M01", &base64::encode(wrapped)),
            Err(Error::SymmetricKeyLength(16))
        ));
    }
}
