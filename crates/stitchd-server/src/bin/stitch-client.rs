//! Submits one imputation request and prints what came back.

use anyhow::Context;
use clap::Parser;
use core::net::{IpAddr, SocketAddr};
use stitchd_core::{Request, Response};
use stitchd_server::client::Client;

#[derive(Parser, Debug)]
#[command(
    name = "stitch-client",
    version,
    about = "Submit a raster imputation request to stitchd"
)]
struct Args {
    /// Server address.
    #[arg(short, long, env = "STITCHD_IP_ADDRESS", default_value = "127.0.0.1")]
    ip_address: IpAddr,

    /// Server port.
    #[arg(short, long, env = "STITCHD_PORT", default_value_t = 12289)]
    port: u16,

    /// Geohash of the tile.
    #[arg(short, long)]
    geohash: String,

    /// Epoch seconds of the requested acquisition.
    #[arg(short, long, allow_hyphen_values = true)]
    timestamp: i64,

    /// Source image path. Repeat for each source; the first one supplies the
    /// output raster's metadata.
    #[arg(short, long = "source", required = true)]
    sources: Vec<String>,

    /// Reference image path.
    #[arg(short, long)]
    reference: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let addr = SocketAddr::new(args.ip_address, args.port);

    let request = Request {
        geohash: args.geohash,
        timestamp: args.timestamp,
        source_image_paths: args.sources,
        reference_image_path: args.reference,
    };

    let response = Client::new(addr)
        .impute(request)
        .await
        .with_context(|| format!("request to {addr} failed"))?;

    match response {
        Response::Success(rasters) => {
            for (i, raster) in rasters.iter().enumerate() {
                let metadata = &raster.metadata;
                println!(
                    "raster {i}: {}x{}, {} band(s), origin ({}, {}), pixel size ({}, {})",
                    metadata.width,
                    metadata.height,
                    metadata.bands.len(),
                    metadata.geotransform[0],
                    metadata.geotransform[3],
                    metadata.geotransform[1],
                    metadata.geotransform[5],
                );
            }
            Ok(())
        }
        Response::Failure(message) => anyhow::bail!("server reported failure: {message}"),
    }
}
