use anyhow::{bail, ensure};
use clap::Parser;
use core::{net::IpAddr, net::SocketAddr, time::Duration};
use std::path::PathBuf;

/// Runtime configuration for the `stitchd` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// geohash vocabulary, model and weights have no defaults: the service cannot
/// start without them.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "stitchd",
    version,
    about = "A batching TCP service for raster image imputation"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `STITCHD_IP_ADDRESS`
    #[arg(short, long, env = "STITCHD_IP_ADDRESS", default_value = "0.0.0.0")]
    pub ip_address: IpAddr,

    /// TCP port to listen on.
    ///
    /// Environment variable: `STITCHD_PORT`
    #[arg(short, long, env = "STITCHD_PORT", default_value_t = 12289)]
    pub port: u16,

    /// Geohash the model was trained on. Repeat the flag once per geohash.
    ///
    /// Codes handed to the engine are positions in the sorted vocabulary, so
    /// the set must match the one used in training.
    ///
    /// Environment variable: `STITCHD_GEOHASHES` (comma separated)
    #[arg(
        short,
        long = "geohash",
        env = "STITCHD_GEOHASHES",
        value_delimiter = ',',
        required = true
    )]
    pub geohashes: Vec<String>,

    /// Path to the model descriptor.
    ///
    /// Environment variable: `STITCHD_MODEL`
    #[arg(short, long, env = "STITCHD_MODEL")]
    pub model: PathBuf,

    /// Path to the model weights.
    ///
    /// Environment variable: `STITCHD_WEIGHTS`
    #[arg(short, long, env = "STITCHD_WEIGHTS")]
    pub weights: PathBuf,

    /// Maximum number of connections served at once.
    ///
    /// Clients beyond this wait in the listen backlog until a connection
    /// finishes.
    ///
    /// Environment variable: `STITCHD_THREAD_COUNT`
    #[arg(short, long, env = "STITCHD_THREAD_COUNT", default_value_t = 33)]
    pub thread_count: usize,

    /// Maximum number of jobs handed to the engine in one call.
    ///
    /// Environment variable: `STITCHD_MAX_BATCH_SIZE`
    #[arg(long, env = "STITCHD_MAX_BATCH_SIZE", default_value_t = 10)]
    pub max_batch_size: usize,

    /// Seconds a client gets to send its whole request.
    ///
    /// Environment variable: `STITCHD_READ_TIMEOUT_SECS`
    #[arg(long, env = "STITCHD_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// Seconds a connection waits for its images before giving up.
    ///
    /// Environment variable: `STITCHD_JOB_TIMEOUT_SECS`
    #[arg(long, env = "STITCHD_JOB_TIMEOUT_SECS", default_value_t = 300)]
    pub job_timeout_secs: u64,

    /// Seconds open connections get to finish once shutdown starts.
    ///
    /// Environment variable: `STITCHD_SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "STITCHD_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub geohashes: Vec<String>,
    pub model: PathBuf,
    pub weights: PathBuf,
    pub thread_count: usize,
    pub max_batch_size: usize,
    pub read_timeout: Duration,
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.thread_count == 0 {
            bail!("STITCHD_THREAD_COUNT must be greater than 0");
        }

        if args.max_batch_size == 0 {
            bail!("STITCHD_MAX_BATCH_SIZE must be greater than 0");
        }

        if args.read_timeout_secs == 0 {
            bail!("STITCHD_READ_TIMEOUT_SECS must be greater than 0");
        }

        if args.job_timeout_secs == 0 {
            bail!("STITCHD_JOB_TIMEOUT_SECS must be greater than 0");
        }

        let geohashes: Vec<String> = args
            .geohashes
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
        ensure!(!geohashes.is_empty(), "at least one geohash is required");

        Ok(Self {
            server_addr: SocketAddr::new(args.ip_address, args.port),
            geohashes,
            model: args.model,
            weights: args.weights,
            thread_count: args.thread_count,
            max_batch_size: args.max_batch_size,
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            job_timeout: Duration::from_secs(args.job_timeout_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
