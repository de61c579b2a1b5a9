use std::sync::Arc;

use votewire::{
    AuditJournal, Ballot, BallotSealer, LocalReceiver, BallotReceiver, SubmitBallotRequest,
    TallyPipeline, Voter, VoterRegistry,
};

/// In-process functional and security checks: sealing, signature
/// integrity, duplicate detection, eligibility, and an end-to-end count.
/// Exits non-zero if any check fails.
pub fn run() {
    println!("Running functional and security checks...");

    let tmp = std::env::temp_dir().join(format!("votewire_selftest_{}", std::process::id()));
    let journal = AuditJournal::new(&tmp, "selftest");
    let pipeline = match TallyPipeline::new(journal) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            eprintln!("votewire selftest: cannot initialise pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let mut failures = 0;
    let mut check = |name: &str, ok: bool| {
        println!("  [{}] {}", if ok { "PASS" } else { "FAIL" }, name);
        if !ok {
            failures += 1;
        }
    };

    let sealer = match BallotSealer::new() {
        Ok(sealer) => sealer,
        Err(e) => {
            eprintln!("votewire selftest: cannot initialise sealer: {}", e);
            std::process::exit(1);
        }
    };

    let enrolled = pipeline
        .server_public_key_base64()
        .and_then(|server_key| sealer.wrap_symmetric_key_for(&server_key))
        .and_then(|wrapped| pipeline.register_station_aes_key("M01", &wrapped))
        .and_then(|_| {
            let signing = sealer.public_signing_key_base64()?;
            pipeline.register_station_signing_key("M01", &signing)
        })
        .is_ok();
    check("station key enrolment", enrolled);

    let receiver = LocalReceiver::new(Arc::clone(&pipeline));

    // end-to-end count through the pipeline
    let ballot = sealer
        .seal(Ballot::new("M01", "C1"))
        .expect("selftest sealing failed");
    let pubkey = sealer.public_signing_key_base64().unwrap_or_default();
    let request = SubmitBallotRequest::from_ballot(&ballot, &pubkey);
    let first = receiver.submit_ballot(&request).unwrap_or(false);
    check("sealed ballot accepted and counted", first);
    check(
        "candidate tally advanced",
        pipeline.aggregator().results_by_candidate().get("C1").copied() == Some(1),
    );

    // duplicate detection
    let replay = receiver.submit_ballot(&request).unwrap_or(true);
    check("replayed ballot refused", !replay);
    check(
        "tally unchanged after replay",
        pipeline.aggregator().results_by_candidate().get("C1").copied() == Some(1),
    );

    // signature integrity
    let tampered_ballot = sealer
        .seal(Ballot::new("M01", "C2"))
        .expect("selftest sealing failed");
    let mut tampered = SubmitBallotRequest::from_ballot(&tampered_ballot, &pubkey);
    tampered.signature[0] = tampered.signature[0].wrapping_add(1);
    let accepted = receiver.submit_ballot(&tampered).unwrap_or(true);
    check("tampered signature refused", !accepted);

    // eligibility
    let registry = VoterRegistry::new(Arc::new(AuditJournal::new(&tmp, "selftest_station")));
    let voter = Voter::new("12345678", "Self Test", "M01");
    let first_check = registry.check(&voter, "M01").is_ok();
    registry.mark_voted(&voter.document);
    let second_check = registry.check(&voter, "M01").is_err();
    let wrong_station = registry
        .check(&Voter::new("87654321", "Self Test", "M02"), "M01")
        .is_err();
    check("eligible voter admitted once", first_check && second_check);
    check("voter at wrong station refused", wrong_station);

    let _ = std::fs::remove_dir_all(&tmp);

    if failures > 0 {
        eprintln!("votewire selftest: {} check(s) failed", failures);
        std::process::exit(1);
    }
    println!("All checks passed.");
}
