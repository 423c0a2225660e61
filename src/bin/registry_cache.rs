use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use registry_cache::cache::load_snapshot;
use registry_cache::{CacheStore, Endpoint};

#[derive(Parser)]
#[command(name = "registry-cache")]
#[command(about = "Inspect a registry disk cache file")]
struct Cli {
    /// Cache file (e.g. ~/.grpc/grpc-registry-<host>-<millis>.cache)
    #[arg(long)]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every service key with its provider count
    List,
    /// Print the cached providers for the service key of a url
    Show {
        /// Subscription url, e.g. consumer://10.0.0.1/com.example.Greeter?version=1.0
        url: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if !cli.file.exists() {
        bail!("cache file {} does not exist", cli.file.display());
    }

    match cli.command {
        Command::List => {
            let snapshot = load_snapshot(&cli.file)
                .with_context(|| format!("reading {}", cli.file.display()))?;
            info!("{} entries in {}", snapshot.len(), cli.file.display());
            for (key, value) in &snapshot {
                println!("{key}\t{}", value.split_whitespace().count());
            }
        }
        Command::Show { url } => {
            let url = Endpoint::parse(&url).context("parsing url")?;
            let store = CacheStore::open(Some(cli.file.clone()), true, 1)
                .with_context(|| format!("opening {}", cli.file.display()))?;
            match store.get_cache_urls(&url) {
                Some(urls) => {
                    for provider in urls {
                        println!("{provider}");
                    }
                }
                None => bail!("no cache entry for {}", url.service_key()),
            }
        }
    }
    Ok(())
}
