use clap::Parser;
use entail_trainer::{TrainArgs, run};
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

fn main() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = TrainArgs::parse();
    if let Err(e) = run(&args) {
        error!("Training failed: {:#}", e);
        std::process::exit(1);
    }
}
