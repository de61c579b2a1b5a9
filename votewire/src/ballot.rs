use chrono::{NaiveDateTime, Timelike, Utc};
use uuid::Uuid;

/// Wire format for timestamps: ISO-8601 at second resolution.
///
/// Both sides format and parse with this exact pattern. The signature input
/// embeds the formatted string, so parsing must be strict: a timestamp that
/// round-trips through parse/format must come back byte-identical.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
}

fn now_second_resolution() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

/// A single voter's choice as produced on a polling station.
///
/// The ballot carries no voter identity: the station separates the voter
/// from the payload before the ballot is created. `sealed_payload` and
/// `signature` are empty until the ballot passes through the sealer, and
/// the record is treated as immutable afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ballot {
    pub id: Uuid,
    pub station_id: String,
    pub emitted_at: NaiveDateTime,
    pub candidate_id: String,

    /// 16-byte IV followed by the AES-256-CBC ciphertext of `candidate_id`.
    #[serde(with = "hex_serde")]
    pub sealed_payload: Vec<u8>,

    /// RSA-2048 SHA-256 signature over `signing_input()`.
    #[serde(with = "hex_serde")]
    pub signature: Vec<u8>,
}

impl Ballot {
    pub fn new(station_id: &str, candidate_id: &str) -> Self {
        Ballot {
            id: Uuid::new_v4(),
            station_id: station_id.to_owned(),
            emitted_at: now_second_resolution(),
            candidate_id: candidate_id.to_owned(),
            sealed_payload: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn emitted_at_string(&self) -> String {
        format_timestamp(&self.emitted_at)
    }

    /// Canonical byte string fed to the signer:
    /// `UTF8(id) ‖ UTF8(station_id) ‖ UTF8(emitted_at) ‖ sealed_payload`,
    /// no separators. The verifier recomputes this bit-for-bit.
    pub fn signing_input(&self) -> Vec<u8> {
        signing_input(
            &self.id,
            &self.station_id,
            &self.emitted_at_string(),
            &self.sealed_payload,
        )
    }

    pub fn is_sealed(&self) -> bool {
        !self.sealed_payload.is_empty() && !self.signature.is_empty()
    }
}

pub fn signing_input(
    id: &Uuid,
    station_id: &str,
    emitted_at: &str,
    sealed_payload: &[u8],
) -> Vec<u8> {
    let mut input = Vec::with_capacity(36 + station_id.len() + emitted_at.len() + sealed_payload.len());
    input.extend_from_slice(id.to_string().as_bytes());
    input.extend_from_slice(station_id.as_bytes());
    input.extend_from_slice(emitted_at.as_bytes());
    input.extend_from_slice(sealed_payload);
    input
}

/// A ballot as observed by the tallier.
///
/// Built from the raw RPC fields once they parse; `decrypted_candidate_id`
/// is populated by the decryptor and the lifecycle flags only ever move
/// false → true.
#[derive(Debug, Clone)]
pub struct ReceivedBallot {
    pub id: Uuid,
    pub station_id: String,
    pub emitted_at: NaiveDateTime,
    pub sealed_payload: Vec<u8>,
    pub signature: Vec<u8>,

    pub received_at: NaiveDateTime,
    pub decrypted_candidate_id: Option<String>,
    pub verified: bool,
    pub counted: bool,
}

impl ReceivedBallot {
    pub fn new(
        id: Uuid,
        station_id: &str,
        emitted_at: NaiveDateTime,
        sealed_payload: Vec<u8>,
        signature: Vec<u8>,
    ) -> Self {
        ReceivedBallot {
            id,
            station_id: station_id.to_owned(),
            emitted_at,
            sealed_payload,
            signature,
            received_at: now_second_resolution(),
            decrypted_candidate_id: None,
            verified: false,
            counted: false,
        }
    }

    pub fn signing_input(&self) -> Vec<u8> {
        signing_input(
            &self.id,
            &self.station_id,
            &format_timestamp(&self.emitted_at),
            &self.sealed_payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips_exactly() {
        let ballot = Ballot::new("M01", "C1");
        let formatted = ballot.emitted_at_string();
        let parsed = parse_timestamp(&formatted).unwrap();
        assert_eq!(parsed, ballot.emitted_at);
        assert_eq!(format_timestamp(&parsed), formatted);
    }

    #[test]
    fn timestamp_rejects_fractional_seconds() {
        assert!(parse_timestamp("2024-05-12T10:33:07.123").is_err());
        assert!(parse_timestamp("2024-05-12T10:33").is_err());
        assert!(parse_timestamp("2024-05-12T10:33:07").is_ok());
    }

    #[test]
    fn signing_input_is_concatenation_in_order() {
        let mut ballot = Ballot::new("M07", "C2");
        ballot.sealed_payload = vec![0xAA, 0xBB];

        let input = ballot.signing_input();
        let mut expected = ballot.id.to_string().into_bytes();
        expected.extend_from_slice(b"M07");
        expected.extend_from_slice(ballot.emitted_at_string().as_bytes());
        expected.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(input, expected);
    }

    #[test]
    fn ballot_serializes_bytes_as_hex() {
        let mut ballot = Ballot::new("M01", "C1");
        ballot.sealed_payload = vec![0x01, 0xFF];
        let json = serde_json::to_string(&ballot).unwrap();
        assert!(json.contains("\"01ff\""));

        let back: Ballot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ballot);
    }
}
