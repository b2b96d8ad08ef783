//! IntelliMaint engine executable

use clap::{Arg, ArgAction, Command};
use im_common::Config;
use im_engine::Engine;
use im_store::Stores;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("im-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("IntelliMaint assessment and diagnostics engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (TOML)")
                .required(false),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"));

    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            info!("loading configuration from {path}");
            Config::from_toml_file(path)?
        }
        None => {
            info!("using default configuration");
            Config::default()
        }
    };

    info!("starting im-engine v{}", env!("CARGO_PKG_VERSION"));
    let stores = Stores::in_memory();
    let engine = match Engine::new(config, stores).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine initialization failed: {e}");
            std::process::exit(1);
        }
    };
    engine.start();

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    engine.shutdown().await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "im_engine=debug,im_assess=debug,im_alarms=debug,im_cycles=debug,im_motor=debug,im_hub=debug,im_store=debug"
    } else {
        "im_engine=info,im_assess=info,im_alarms=info,im_cycles=info,im_motor=info,im_hub=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
