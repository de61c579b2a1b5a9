use clap::{App, AppSettings, Arg, SubCommand};

mod command_results;
mod command_selftest;
mod command_submit;

fn main() {
    env_logger::init();

    let mut app = App::new("VoteWire")
        .version("1.0")
        .about("VoteWire station command-line tool")
        .setting(AppSettings::ArgRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .help("Configuration file location - can also be set with VOTEWIRE_CONFIG"),
        )
        .subcommand(
            SubCommand::with_name("submit")
                .about("Enrol this station and submit a sample ballot")
                .arg(
                    Arg::with_name("station")
                        .long("station")
                        .takes_value(true)
                        .default_value("M01")
                        .help("Station identifier"),
                )
                .arg(
                    Arg::with_name("candidate")
                        .long("candidate")
                        .takes_value(true)
                        .required(true)
                        .help("Candidate identifier for the sample ballot"),
                )
                .arg(
                    Arg::with_name("document")
                        .long("document")
                        .takes_value(true)
                        .default_value("12345678")
                        .help("Voter document for the eligibility check"),
                ),
        )
        .subcommand(SubCommand::with_name("ping").about("Check the tallier is reachable"))
        .subcommand(
            SubCommand::with_name("results").about("Print the tallier's aggregated results"),
        )
        .subcommand(
            SubCommand::with_name("selftest")
                .about("Run the in-process functional and security checks"),
        );

    let matches = app.clone().get_matches();

    let config = load_config(matches.value_of("config"));

    if let Some(matches) = matches.subcommand_matches("submit") {
        command_submit::run(&config, matches);
        return;
    }
    if matches.subcommand_matches("ping").is_some() {
        command_results::ping(&config);
        return;
    }
    if matches.subcommand_matches("results").is_some() {
        command_results::run(&config);
        return;
    }
    if matches.subcommand_matches("selftest").is_some() {
        command_selftest::run();
        return;
    }

    // No command, just print help
    app.print_help().expect("Unable to print help message");
    println!();
}

fn load_config(path: Option<&str>) -> votewire::Config {
    let result = match path {
        Some(path) => votewire::Config::load(std::path::Path::new(path)),
        None => votewire::Config::load_default(),
    };
    result.unwrap_or_else(|e| {
        eprintln!("votewire: unable to load configuration: {}", e);
        std::process::exit(1);
    })
}
