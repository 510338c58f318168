//! page-node - serve micron pages and files to remote peers.

mod bridge;
mod cli;
mod config;
mod core;
mod logger;
mod node;
mod serve;
mod stats;
mod utils;

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};

use bridge::HttpDestination;
use cli::Cli;
use config::NodeConfig;
use core::StopSignal;
use node::{APP_NAME, Destination, NodeIdentity, NodeSettings, PageNode};
use serve::{ContentRouter, ScriptSandbox};
use stats::{NodeInfo, StatsAggregator};
use utils::date::unix_now;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = NodeConfig::load(&cli)?;
    logger::set_level(config.log_level);

    run(&config)
}

fn run(config: &NodeConfig) -> Result<()> {
    let identity = NodeIdentity::load_or_create(&config.identity_dir)
        .context("failed to load node identity")?;
    let address = identity.destination_hash(APP_NAME);

    let router = ContentRouter::new(
        &config.pages_dir,
        &config.files_dir,
        ScriptSandbox::new(config.script_timeout()),
    )
    .context("failed to index served directories")?;

    let mut stats = StatsAggregator::new(NodeInfo {
        name: config.node_name.clone(),
        identity_hash: identity.hash_hex(),
        destination_hash: hex::encode(address),
        pages_dir: config.pages_dir.clone(),
        files_dir: config.files_dir.clone(),
        started_at: unix_now(),
    });
    if let Some(path) = &config.stats_file {
        stats = stats.with_store(path);
    }

    let destination = HttpDestination::bind(config.interface, config.port, address.to_vec())?;
    let stop = StopSignal::new();

    let on_stop = {
        let destination = Arc::clone(&destination);
        move || destination.close()
    };
    core::setup_shutdown_handler(stop.clone(), on_stop)?;

    let settings = NodeSettings {
        name: config.node_name.clone(),
        announce_interval: config.announce_interval(),
        page_refresh_interval: config.page_refresh_interval(),
        file_refresh_interval: config.file_refresh_interval(),
    };
    let transport: Arc<dyn Destination> = destination.clone();
    let node = PageNode::start(router, Arc::new(stats), transport, settings, stop.clone())?;

    let server = {
        let destination = Arc::clone(&destination);
        thread::Builder::new()
            .name("bridge".into())
            .spawn(move || {
                let result = destination.serve();
                stop.trigger();
                result
            })
            .context("failed to start request loop")?
    };

    log!("node"; "page node running, address {}. Press Ctrl+C to exit.", hex::encode(address));
    log!("node"; "identity {}", identity.hash_hex());

    node.wait();
    node.shutdown();

    match server.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.context("request loop failed")),
        Err(_) => Err(anyhow::anyhow!("request loop panicked")),
    }
}
