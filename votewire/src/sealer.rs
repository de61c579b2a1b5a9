use crate::{Ballot, Error, Result};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const IV_LENGTH: usize = 16;
pub const AES_KEY_LENGTH: usize = 32;
const RSA_BITS: usize = 2048;

/// Station-side sealer: turns a plaintext ballot into a signed, encrypted
/// wire record and exposes the key material the tallier needs to reverse
/// the transformation.
///
/// Holds the station's RSA-2048 signing keypair and its AES-256 key. Key
/// generation failure is fatal for the station; everything downstream
/// assumes the sealer exists.
pub struct BallotSealer {
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
    aes_key: [u8; AES_KEY_LENGTH],
}

impl BallotSealer {
    pub fn new() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
        let public_key = RsaPublicKey::from(&private_key);

        let mut aes_key = [0u8; AES_KEY_LENGTH];
        OsRng.fill_bytes(&mut aes_key);

        Ok(BallotSealer {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
            aes_key,
        })
    }

    /// Populate `sealed_payload` and `signature`, consuming the plaintext
    /// ballot and returning its sealed form.
    ///
    /// AES-256-CBC with PKCS7 padding and a fresh random IV per ballot,
    /// IV prepended to the ciphertext; then SHA-256 with RSA (PKCS#1 v1.5)
    /// over the canonical byte string.
    pub fn seal(&self, mut ballot: Ballot) -> Result<Ballot> {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.aes_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(ballot.candidate_id.as_bytes());

        let mut sealed = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ciphertext);
        ballot.sealed_payload = sealed;

        let signature = self.signing_key.sign(&ballot.signing_input());
        ballot.signature = signature.to_vec();

        Ok(ballot)
    }

    /// The station's public signing key as a base64 X.509
    /// SubjectPublicKeyInfo, the format the tallier's verifier installs.
    pub fn public_signing_key_base64(&self) -> Result<String> {
        let der = self.public_key.to_public_key_der()?;
        Ok(base64::encode(der.as_bytes()))
    }

    /// Encrypt the station's AES key under the tallier's public key
    /// (PKCS#1 v1.5), for one-time delivery at session start.
    pub fn wrap_symmetric_key_for(&self, tallier_public_key_b64: &str) -> Result<String> {
        let der = base64::decode(tallier_public_key_b64)?;
        let tallier_key = RsaPublicKey::from_public_key_der(&der)?;
        let wrapped = tallier_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &self.aes_key)?;
        Ok(base64::encode(wrapped))
    }

    #[cfg(test)]
    pub(crate) fn symmetric_key(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.aes_key
    }
}

/// Split a sealed payload into its IV and ciphertext halves.
pub fn split_sealed_payload(sealed: &[u8]) -> Result<(&[u8], &[u8])> {
    if sealed.len() <= IV_LENGTH {
        return Err(Error::SealedPayloadTooShort);
    }
    Ok(sealed.split_at(IV_LENGTH))
}
