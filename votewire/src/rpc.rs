use crate::{Ballot, Error, Result, TallyPipeline};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The wire record for a ballot submission.
///
/// `station_pubkey_b64` travels for compatibility with stations that still
/// send it, but the tallier authenticates against enrolled keys only.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitBallotRequest {
    pub ballot_id: String,
    pub station_id: String,
    pub emitted_at: String,
    #[serde(with = "hex_serde")]
    pub sealed_payload: Vec<u8>,
    #[serde(with = "hex_serde")]
    pub signature: Vec<u8>,
    pub station_pubkey_b64: String,
}

impl SubmitBallotRequest {
    pub fn from_ballot(ballot: &Ballot, station_pubkey_b64: &str) -> Self {
        SubmitBallotRequest {
            ballot_id: ballot.id.to_string(),
            station_id: ballot.station_id.clone(),
            emitted_at: ballot.emitted_at_string(),
            sealed_payload: ballot.sealed_payload.clone(),
            signature: ballot.signature.clone(),
            station_pubkey_b64: station_pubkey_b64.to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterSigningKeyRequest {
    pub station_id: String,
    pub public_key_b64: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterAesKeyRequest {
    pub station_id: String,
    pub wrapped_key_b64: String,
}

/// The tallier's RPC surface as seen from a station.
///
/// The boolean returned by `submit_ballot` is the authoritative ack:
/// `true` means the ballot is durably in the dedup set and counted,
/// `false` means some pipeline stage refused it. Transport faults are the
/// `Err` branch, and only those feed the circuit breaker.
pub trait BallotReceiver: Send + Sync {
    fn submit_ballot(&self, request: &SubmitBallotRequest) -> Result<bool>;
    fn ping(&self) -> Result<bool>;
    fn fetch_server_public_key(&self) -> Result<String>;
}

/// In-process adapter: station and tallier in the same address space.
/// Used by the self-test and the test suite.
pub struct LocalReceiver {
    pipeline: Arc<TallyPipeline>,
}

impl LocalReceiver {
    pub fn new(pipeline: Arc<TallyPipeline>) -> Self {
        LocalReceiver { pipeline }
    }
}

impl BallotReceiver for LocalReceiver {
    fn submit_ballot(&self, request: &SubmitBallotRequest) -> Result<bool> {
        Ok(self.pipeline.receive(request))
    }

    fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    fn fetch_server_public_key(&self) -> Result<String> {
        self.pipeline.server_public_key_base64()
    }
}

/// HTTP adapter over the tallier's JSON API.
pub struct HttpBallotReceiver {
    base_uri: String,
    client: reqwest::blocking::Client,
}

impl HttpBallotReceiver {
    /// Accepts either an `http://host:port` base URI or a
    /// `tcp -h HOST -p PORT` endpoint string from the config file.
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpBallotReceiver {
            base_uri: endpoint_to_uri(endpoint)?,
            client,
        })
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Out-of-band enrolment of a station's signing key; must precede the
    /// first submission from that station.
    pub fn register_signing_key(&self, station_id: &str, public_key_b64: &str) -> Result<bool> {
        let request = RegisterSigningKeyRequest {
            station_id: station_id.to_owned(),
            public_key_b64: public_key_b64.to_owned(),
        };
        let accepted = self
            .client
            .post(format!("{}/api/station/signing_key", self.base_uri))
            .json(&request)
            .send()?
            .json()?;
        Ok(accepted)
    }

    /// Deliver the station's wrapped AES key.
    pub fn register_aes_key(&self, station_id: &str, wrapped_key_b64: &str) -> Result<bool> {
        let request = RegisterAesKeyRequest {
            station_id: station_id.to_owned(),
            wrapped_key_b64: wrapped_key_b64.to_owned(),
        };
        let accepted = self
            .client
            .post(format!("{}/api/station/aes_key", self.base_uri))
            .json(&request)
            .send()?
            .json()?;
        Ok(accepted)
    }

    pub fn results_by_candidate(&self) -> Result<HashMap<String, u64>> {
        let results = self
            .client
            .get(format!("{}/api/results", self.base_uri))
            .send()?
            .json()?;
        Ok(results)
    }

    pub fn summary(&self) -> Result<String> {
        let summary = self
            .client
            .get(format!("{}/api/summary", self.base_uri))
            .send()?
            .text()?;
        Ok(summary)
    }
}

impl BallotReceiver for HttpBallotReceiver {
    fn submit_ballot(&self, request: &SubmitBallotRequest) -> Result<bool> {
        let accepted = self
            .client
            .post(format!("{}/api/ballot", self.base_uri))
            .json(request)
            .send()?
            .json()?;
        Ok(accepted)
    }

    fn ping(&self) -> Result<bool> {
        let alive = self
            .client
            .get(format!("{}/api/ping", self.base_uri))
            .send()?
            .json()?;
        Ok(alive)
    }

    fn fetch_server_public_key(&self) -> Result<String> {
        let key = self
            .client
            .get(format!("{}/api/public_key", self.base_uri))
            .send()?
            .text()?;
        Ok(key)
    }
}

/// Translate the config file's endpoint notation (`tcp -h HOST -p PORT`)
/// into an HTTP base URI. Already-usable URIs pass through.
pub fn endpoint_to_uri(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.trim_end_matches('/').to_owned());
    }

    let mut host = "localhost";
    let mut port = "10000";
    let mut tokens = endpoint.split_whitespace();
    match tokens.next() {
        Some("tcp") | Some("default") => {}
        _ => return Err(Error::BadEndpoint(endpoint.to_owned())),
    }
    while let Some(token) = tokens.next() {
        match token {
            "-h" => host = tokens.next().ok_or_else(|| Error::BadEndpoint(endpoint.to_owned()))?,
            "-p" => port = tokens.next().ok_or_else(|| Error::BadEndpoint(endpoint.to_owned()))?,
            _ => return Err(Error::BadEndpoint(endpoint.to_owned())),
        }
    }
    Ok(format!("http://{}:{}", host, port))
}
