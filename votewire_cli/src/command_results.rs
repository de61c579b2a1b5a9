use votewire::{BallotReceiver, Config, HttpBallotReceiver};

pub fn run(config: &Config) {
    let http = client(config);

    let summary = http.summary().unwrap_or_else(|e| {
        eprintln!("votewire results: cannot fetch summary: {}", e);
        std::process::exit(1);
    });
    println!("{}", summary);

    match http.results_by_candidate() {
        Ok(results) => {
            let mut candidates: Vec<_> = results.into_iter().collect();
            candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            for (candidate, votes) in candidates {
                println!("{}\t{}", candidate, votes);
            }
        }
        Err(e) => {
            eprintln!("votewire results: cannot fetch results: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn ping(config: &Config) {
    let http = client(config);
    match http.ping() {
        Ok(true) => println!("tallier at {} is up", http.base_uri()),
        Ok(false) => {
            eprintln!("votewire ping: tallier reported not ready");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("votewire ping: {}", e);
            std::process::exit(1);
        }
    }
}

fn client(config: &Config) -> HttpBallotReceiver {
    HttpBallotReceiver::new(&config.receiver_endpoint).unwrap_or_else(|e| {
        eprintln!("votewire: bad endpoint: {}", e);
        std::process::exit(1);
    })
}
