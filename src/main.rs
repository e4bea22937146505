//! satgate command line: record one service from the channel list to a
//! transport stream file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use tokio::sync::mpsc::unbounded_channel;

use satgate::channels::ChannelList;
use satgate::config::{Config, FrontendSection};
use satgate::frontend::lnb::LnbConfig;
use satgate::frontend::pool::FrontendPool;
use satgate::frontend::platform_backend;
use satgate::reactor::Reactor;
use satgate::remux::{DataCallback, RemuxEngine, TeardownCallback};

/// satgate - DVB-S/S2 satellite streaming gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the channel to record
    channel: String,

    /// Output file for the remuxed transport stream
    #[arg(short, long, default_value = "out.ts")]
    output: PathBuf,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Channel list file (overrides the config file)
    #[arg(short = 'l', long)]
    channels: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config file: explicit path > auto-detect > defaults.
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("satgate.toml");
        default_path.exists().then_some(default_path)
    });
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    satgate::logging::init(
        &config.gateway.log_dir,
        config.gateway.log_retention_days,
        args.verbose,
    )?;
    if let Some(path) = &config_path {
        info!("loaded config from {}", path.display());
    }

    let channels_path = args.channels.unwrap_or_else(|| config.gateway.channels.clone());
    let list = ChannelList::load(&channels_path)?;
    let channel = list
        .find(&args.channel)
        .ok_or_else(|| format!("channel {:?} not in {}", args.channel, channels_path.display()))?
        .clone();

    let backend = platform_backend()?;
    let (event_tx, event_rx) = unbounded_channel();
    let mut pool = FrontendPool::new(backend.into(), event_tx, config.pool_options())?;

    let frontends = if config.frontends.is_empty() {
        vec![FrontendSection {
            adapter: 0,
            frontend: 0,
            lnb: LnbConfig::default(),
        }]
    } else {
        config.frontends.clone()
    };
    for fe in frontends {
        pool.add_frontend(fe.adapter, fe.frontend, fe.lnb)?;
    }

    let engine = RemuxEngine::new(pool, config.gateway.max_retries);
    let (reactor, handle) = Reactor::new(engine, event_rx);

    {
        let handle = handle.clone();
        ctrlc::set_handler(move || {
            eprintln!("interrupted, shutting down");
            handle.shutdown();
        })?;
    }

    let mut writer = BufWriter::new(File::create(&args.output)?);
    let mut write_failed = false;
    let data: DataCallback = Box::new(move |packet| {
        if write_failed {
            return;
        }
        if let Err(e) = writer.write_all(packet) {
            error!("write to output failed: {e}");
            write_failed = true;
        }
    });
    let teardown: TeardownCallback = {
        let handle = handle.clone();
        Box::new(move || {
            error!("service lost, stopping");
            handle.shutdown();
        })
    };

    let reactor_task = tokio::spawn(reactor.run());
    match handle.subscribe(channel.tune, data, teardown).await {
        Ok(id) => info!(
            "recording {:?} (sid {}) to {}, subscriber {id:?}",
            channel.name,
            channel.tune.sid,
            args.output.display()
        ),
        Err(e) => {
            error!("cannot subscribe: {e}");
            handle.shutdown();
            reactor_task.await?;
            return Err(e.into());
        }
    }

    reactor_task.await?;
    info!("stopped");
    Ok(())
}
