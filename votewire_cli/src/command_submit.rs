use std::sync::Arc;

use votewire::{
    AuditJournal, BallotReceiver, BallotSealer, Config, HttpBallotReceiver, Outbox, Station,
    SubmitOutcome, Transmitter, Voter, VoterRegistry,
};

/// Enrol a fresh station keypair with the tallier and push one sample
/// ballot through the full station stack.
pub fn run(config: &Config, matches: &clap::ArgMatches) {
    // Unwraps OK - required or defaulted args
    let station_id = matches.value_of("station").unwrap();
    let candidate_id = matches.value_of("candidate").unwrap();
    let document = matches.value_of("document").unwrap();

    let http = HttpBallotReceiver::new(&config.receiver_endpoint).unwrap_or_else(|e| {
        eprintln!("votewire submit: bad endpoint: {}", e);
        std::process::exit(1);
    });

    let sealer = BallotSealer::new().unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot initialise sealer: {}", e);
        std::process::exit(1);
    });

    enrol(&http, &sealer, station_id);

    let journal = Arc::new(AuditJournal::new(&config.audit_dir, "votacion"));
    let outbox = Arc::new(Outbox::new(&config.outbox_dir).unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot open outbox: {}", e);
        std::process::exit(1);
    }));
    let station_pubkey = sealer.public_signing_key_base64().unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot encode public key: {}", e);
        std::process::exit(1);
    });

    let receiver = HttpBallotReceiver::new(&config.receiver_endpoint).unwrap_or_else(|e| {
        eprintln!("votewire submit: bad endpoint: {}", e);
        std::process::exit(1);
    });
    let transmitter = Arc::new(Transmitter::new(
        Arc::new(receiver) as Arc<dyn BallotReceiver>,
        Arc::clone(&outbox),
        Arc::clone(&journal),
        station_pubkey,
        config.breaker.clone(),
    ));
    let registry = Arc::new(VoterRegistry::new(Arc::clone(&journal)));
    let station = Station::new(station_id, sealer, outbox, transmitter, registry, journal);

    let voter = Voter::new(document, "Operator Test Voter", station_id);
    match station.cast_vote(&voter, candidate_id) {
        Ok(SubmitOutcome::Acknowledged) => {
            println!("ballot acknowledged by the tallier");
        }
        Ok(SubmitOutcome::Rejected) => {
            eprintln!("votewire submit: tallier refused the ballot (see its audit journal)");
            std::process::exit(1);
        }
        Ok(SubmitOutcome::TransportFailed) | Ok(SubmitOutcome::Deferred) => {
            println!("tallier unreachable; ballot stored pending retransmission");
        }
        Err(e) => {
            eprintln!("votewire submit: {}", e);
            std::process::exit(1);
        }
    }
}

fn enrol(http: &HttpBallotReceiver, sealer: &BallotSealer, station_id: &str) {
    let server_key = http.fetch_server_public_key().unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot fetch tallier public key: {}", e);
        std::process::exit(1);
    });

    let signing_key = sealer.public_signing_key_base64().unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot encode public key: {}", e);
        std::process::exit(1);
    });
    let wrapped = sealer.wrap_symmetric_key_for(&server_key).unwrap_or_else(|e| {
        eprintln!("votewire submit: cannot wrap symmetric key: {}", e);
        std::process::exit(1);
    });

    let signing_ok = http
        .register_signing_key(station_id, &signing_key)
        .unwrap_or(false);
    let aes_ok = http.register_aes_key(station_id, &wrapped).unwrap_or(false);
    if !signing_ok || !aes_ok {
        eprintln!("votewire submit: key enrolment refused for station {}", station_id);
        std::process::exit(1);
    }
    println!("station {} enrolled with the tallier", station_id);
}
