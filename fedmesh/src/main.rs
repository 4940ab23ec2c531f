use fedmesh::config;
use fedmesh::federator::{self, Federator};
use std::process;
use tracing::info;

/// Structured logging, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[compio::main]
async fn main() {
    init_tracing();

    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fedmesh: {e}");
            process::exit(1);
        }
    };

    let ctx = match federator::build_context(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("fedmesh: cannot reach local broker: {e}");
            process::exit(1);
        }
    };

    info!("federator {} started", config.id);

    // Runs until killed; losing the broker connection is fatal.
    if let Err(e) = Federator::new(ctx).run().await {
        eprintln!("fedmesh: {e}");
        process::exit(1);
    }
}
