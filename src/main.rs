//! Bandwidth-saving image proxy.
//!
//! Fetches an image on behalf of a client, re-encodes it as low-quality WebP
//! or JPEG (optionally grayscale) and streams the smaller result back. Any
//! failure sends the client to the original URL instead.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    IMAGE PROXY                        │
//!                    │                                                       │
//!   Client Request   │  ┌─────────┐    ┌─────────┐    ┌──────────┐          │
//!   ─────────────────┼─▶│  http   │───▶│ policy  │───▶│ upstream │◀─────────┼──── Origin
//!                    │  │ server  │    │ params  │    │ fetcher  │          │
//!                    │  └─────────┘    └─────────┘    └────┬─────┘          │
//!                    │                                     │                │
//!                    │                       bypass ◀──────┼──────▶ compress │
//!                    │                                     ▼                │
//!   Client Response  │  ┌─────────┐                 ┌────────────┐          │
//!   ◀────────────────┼──│response │◀────────────────│ transcode  │          │
//!                    │  │redirect │                 │  pipeline  │          │
//!                    │  └─────────┘                 └────────────┘          │
//!                    │                                                       │
//!                    │  config · cache · observability · resilience ·        │
//!                    │  lifecycle                                            │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use bandwidth_hero_proxy::config::loader::resolve_config;
use bandwidth_hero_proxy::lifecycle::startup;

#[derive(Parser)]
#[command(name = "bandwidth-hero-proxy")]
#[command(about = "Bandwidth-saving image compression proxy", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "BANDWIDTH_HERO_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let port = std::env::var("PORT").ok();
    let config = resolve_config(cli.config.as_deref(), port.as_deref())?;

    startup::run(config).await?;
    Ok(())
}
