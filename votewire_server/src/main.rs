#[macro_use]
extern crate rocket;

use std::collections::HashMap;

use log::error;
use rocket::serde::json::Json;
use rocket::State;

use votewire::{
    AuditJournal, Config, RegisterAesKeyRequest, RegisterSigningKeyRequest, SubmitBallotRequest,
    TallyPipeline,
};

#[post("/api/ballot", data = "<request>")]
fn submit_ballot(pipeline: &State<TallyPipeline>, request: Json<SubmitBallotRequest>) -> Json<bool> {
    Json(pipeline.receive(&request))
}

#[get("/api/ping")]
fn ping() -> Json<bool> {
    Json(true)
}

#[get("/api/public_key")]
fn public_key(pipeline: &State<TallyPipeline>) -> String {
    pipeline.server_public_key_base64().unwrap_or_else(|e| {
        error!("could not encode server public key: {}", e);
        String::new()
    })
}

#[post("/api/station/signing_key", data = "<request>")]
fn register_signing_key(
    pipeline: &State<TallyPipeline>,
    request: Json<RegisterSigningKeyRequest>,
) -> Json<bool> {
    match pipeline.register_station_signing_key(&request.station_id, &request.public_key_b64) {
        Ok(()) => Json(true),
        Err(e) => {
            error!(
                "signing key enrolment failed for station {}: {}",
                request.station_id, e
            );
            Json(false)
        }
    }
}

#[post("/api/station/aes_key", data = "<request>")]
fn register_aes_key(
    pipeline: &State<TallyPipeline>,
    request: Json<RegisterAesKeyRequest>,
) -> Json<bool> {
    match pipeline.register_station_aes_key(&request.station_id, &request.wrapped_key_b64) {
        Ok(()) => Json(true),
        Err(e) => {
            error!(
                "AES key enrolment failed for station {}: {}",
                request.station_id, e
            );
            Json(false)
        }
    }
}

#[get("/api/results")]
fn results(pipeline: &State<TallyPipeline>) -> Json<HashMap<String, u64>> {
    Json(pipeline.aggregator().results_by_candidate())
}

#[get("/api/results/stations")]
fn results_by_station(pipeline: &State<TallyPipeline>) -> Json<HashMap<String, u64>> {
    Json(pipeline.aggregator().results_by_station())
}

#[get("/api/summary")]
fn summary(pipeline: &State<TallyPipeline>) -> String {
    pipeline.aggregator().summary()
}

#[rocket::main]
async fn main() {
    env_logger::init();

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("votewire_server: unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let journal = AuditJournal::new(&config.audit_dir, "servidor");
    let pipeline = match TallyPipeline::new(journal) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("votewire_server: unable to initialise pipeline: {}", e);
            std::process::exit(1);
        }
    };
    pipeline
        .aggregator()
        .set_registered_voters(config.registered_voters);

    let result = rocket::build()
        .manage(pipeline)
        .mount(
            "/",
            routes![
                submit_ballot,
                ping,
                public_key,
                register_signing_key,
                register_aes_key,
                results,
                results_by_station,
                summary
            ],
        )
        .launch()
        .await;

    if let Err(e) = result {
        eprintln!("votewire_server: launch failed: {}", e);
        std::process::exit(1);
    }
}
