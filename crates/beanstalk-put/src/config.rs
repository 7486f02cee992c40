use anyhow::bail;
use beanstalk_pool::{Options, PutParams, validate_tube};
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `beanstalk-put` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults that target a local broker.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "beanstalk-put",
    version,
    about = "Submit jobs to beanstalkd through a pool of producer connections"
)]
pub struct CliArgs {
    /// Broker addresses, comma separated. One connection is opened per
    /// entry; repeat an address to open several connections to it.
    ///
    /// Environment variable: `BEANSTALK_ENDPOINTS`
    #[arg(
        long,
        env = "BEANSTALK_ENDPOINTS",
        value_delimiter = ',',
        default_value = "127.0.0.1:11300"
    )]
    pub endpoints: Vec<String>,

    /// Tube the jobs are put into.
    ///
    /// Environment variable: `BEANSTALK_TUBE`
    #[arg(long, env = "BEANSTALK_TUBE", default_value_t = String::from("default"))]
    pub tube: String,

    /// Job priority; lower is more urgent.
    ///
    /// Environment variable: `BEANSTALK_PRIORITY`
    #[arg(long, env = "BEANSTALK_PRIORITY", default_value_t = 1024)]
    pub priority: u32,

    /// Seconds before the job becomes ready.
    ///
    /// Environment variable: `BEANSTALK_DELAY`
    #[arg(long, env = "BEANSTALK_DELAY", default_value_t = 0)]
    pub delay: u64,

    /// Seconds a worker may hold the job before it is released.
    ///
    /// Environment variable: `BEANSTALK_TTR`
    #[arg(long, env = "BEANSTALK_TTR", default_value_t = 60)]
    pub ttr: u64,

    /// Number of copies of the body to submit.
    ///
    /// Environment variable: `BEANSTALK_COUNT`
    #[arg(long, env = "BEANSTALK_COUNT", default_value_t = 1)]
    pub count: usize,

    /// Number of concurrent submitters sharing the pool. Submitters beyond
    /// the number of endpoints wait for a free connection.
    ///
    /// Environment variable: `BEANSTALK_CONCURRENCY`
    #[arg(long, env = "BEANSTALK_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Milliseconds allowed for opening each connection.
    ///
    /// Environment variable: `BEANSTALK_CONNECT_TIMEOUT_MS`
    #[arg(long, env = "BEANSTALK_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Milliseconds allowed for a single put exchange.
    ///
    /// Environment variable: `BEANSTALK_IO_TIMEOUT_MS`
    #[arg(long, env = "BEANSTALK_IO_TIMEOUT_MS", default_value_t = 10_000)]
    pub io_timeout_ms: u64,

    /// Job body. Read from stdin when omitted.
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PutConfig {
    pub endpoints: Vec<String>,
    pub tube: String,
    pub params: PutParams,
    pub count: usize,
    pub concurrency: usize,
    pub options: Options,
    pub body: Option<String>,
}

impl TryFrom<CliArgs> for PutConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let endpoints: Vec<String> = args
            .endpoints
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        if endpoints.is_empty() {
            bail!("BEANSTALK_ENDPOINTS must name at least one broker");
        }

        if args.count == 0 {
            bail!("BEANSTALK_COUNT must be greater than 0");
        }

        if args.concurrency == 0 {
            bail!("BEANSTALK_CONCURRENCY must be greater than 0");
        }

        if let Err(e) = validate_tube(&args.tube) {
            bail!("BEANSTALK_TUBE is invalid: {e}");
        }

        Ok(Self {
            endpoints,
            tube: args.tube,
            params: PutParams::new(
                args.priority,
                Duration::from_secs(args.delay),
                Duration::from_secs(args.ttr),
            ),
            count: args.count,
            concurrency: args.concurrency.min(args.count),
            options: Options {
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                read_write_timeout: Duration::from_millis(args.io_timeout_ms),
                ..Options::default()
            }
            .sanitize(),
            body: args.body,
        })
    }
}
