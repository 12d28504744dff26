use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use env_logger::{Builder, Env};
use log::{error, info};

use tally::config::TallyConfig;
use tally::workers::api;
use tally::workers::community::delay::UniformDelay;
use tally::workers::community::lookup::VoteTable;
use tally::workers::error::TallyResult;
use tally::workers::messages::BatchResults;
use tally::workers::sink::Vote;

const HOWLERS: [&str; 4] = ["Mikey", "nom nom", "Panda", "Mr X"];

fn get_loggings() {
    let env = Env::default().filter_or("TALLY_LOG_LEVEL", "info");
    Builder::from_env(env).init()
}

fn load_config() -> Option<TallyConfig> {
    match env::args().nth(1) {
        Some(path) => match TallyConfig::load_from_file(&path) {
            Ok(config) => Some(config),
            Err(err) => {
                error!("Could not load {}: {}", path, err);
                None
            }
        },
        None => Some(TallyConfig::default()),
    }
}

fn vote_table(config: &TallyConfig) -> VoteTable {
    if config.lookup.votes.is_empty() {
        VoteTable::sample()
    } else {
        VoteTable::from_config(&config.lookup)
    }
}

fn print_results(results: &BatchResults) {
    let mut rows: Vec<_> = results.values().collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    for result in rows {
        let origin = if result.is_default { "default" } else { "lookup" };
        println!(
            "  {:<8} {:>4} ({}, {:?})",
            result.key, result.value, origin, result.elapsed
        );
    }
}

async fn run_demo(config: &TallyConfig) -> TallyResult<()> {
    let table = vote_table(config);
    println!("Votes for Panda without asking anyone: {}", table.vote_for("Panda"));

    let delays = Arc::new(UniformDelay::new(config.lookup.max_delay()));
    let mut coordinator = api::start_vote_coordinator(config, table, delays);

    let started = Instant::now();
    let results = api::run_batch_unbounded(&mut coordinator, config, &HOWLERS).await?;
    println!("Waiting for every lookup took {:?}", started.elapsed());
    print_results(&results);

    let started = Instant::now();
    let results = api::run_batch(&mut coordinator, config, &HOWLERS).await?;
    println!(
        "Lookups with a {:?} deadline took {:?}",
        config.batch.deadline(),
        started.elapsed()
    );
    print_results(&results);

    let sink = api::lousy_sink(config);
    let recorder = api::start_vote_recorder(config, sink.clone())?;
    for (voter, howler) in [(1, "Panda"), (2, "Panda"), (3, "Panda"), (4, "Mikey")] {
        let report = recorder.record_with_receipt(Vote::now(voter, howler)).await?;
        info!(key = report.key(), worker = report.worker_id(); "Vote handled");
    }
    recorder.shutdown().await;
    println!("Stored in {}:", sink.url());
    for record in sink.records() {
        println!("  {:?}", record);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    get_loggings();
    let Some(config) = load_config() else {
        return ExitCode::FAILURE;
    };
    match run_demo(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Demo failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
