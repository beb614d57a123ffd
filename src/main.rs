use clap::Parser;

use std::sync::Arc;
use std::time::Duration;

pub mod api;
pub mod app;
pub mod error;
pub mod poller;
pub mod result;
pub mod session;
pub mod source;
pub mod transport;
pub mod upload;
pub mod worker;

#[cfg(test)]
mod testing;

use api::{ServiceClient, DEFAULT_API_PREFIX};
use app::{App, RunOutcome};
use error::Error;
use poller::{PollPolicy, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
use result::Result;
use transport::{ClientConfig, HttpTransport, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT};
use upload::{UploadConfig, CLIENT_MAX_CONCURRENCY};
use worker::{RetryPolicy, DEFAULT_UPLOAD_ATTEMPTS};

/// Upload a firmware image for analysis and optionally wait for the scan.
#[derive(Parser)]
#[command(version)]
struct Opts {
    #[arg(short, long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_API_PREFIX)]
    api_prefix: String,

    #[arg(short, long, env = "FWSCAN_TOKEN", hide_env_values = true)]
    token: String,

    #[arg(short, long)]
    artifact_id: String,

    /// Path or glob pattern matching exactly one file.
    #[arg(short, long)]
    file: String,

    /// Name reported to the service; defaults to the file name.
    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long)]
    wait: bool,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_POLLS)]
    max_polls: u32,

    /// Poll every 5 seconds until this many seconds have passed, instead of
    /// counting polls.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(short, long, default_value_t = DEFAULT_UPLOAD_ATTEMPTS)]
    retries: u32,

    #[arg(long, default_value_t = 0)]
    retry_backoff_ms: u64,

    #[arg(long, default_value_t = CLIENT_MAX_CONCURRENCY)]
    max_concurrency: u32,

    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout_secs: u64,

    /// Send a Content-MD5 header with every part.
    #[arg(long)]
    content_md5: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opts: Opts = Opts::parse();

    if let Err(err) = run(opts).await {
        log::error!("{}", err);
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<()> {
    let transport = HttpTransport::new(&opts.client_config()?)?;
    let client = Arc::new(ServiceClient::new(Arc::new(transport), &opts.api_prefix));
    let file = upload::resolve_artifact(&opts.file)?;

    let app = App::new(client, opts.upload_config()?, opts.poll_policy()?);

    let cancel = app.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping");
            cancel.cancel();
        }
    });

    match app.run(&file, opts.name.as_deref()).await? {
        RunOutcome::Uploaded { session_id } => println!("uploaded {}", session_id),
        RunOutcome::Scanned { session_id } => println!("scan finished for {}", session_id),
    }

    Ok(())
}

impl Opts {
    fn client_config(&self) -> Result<ClientConfig> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("token is empty".to_owned()));
        }

        let mut config = ClientConfig::new(&self.base_url, self.token.trim());
        let url = reqwest::Url::parse(&config.base_url)
            .map_err(|err| Error::Config(format!("invalid base url {}: {}", config.base_url, err)))?;
        match url.scheme() {
            "https" => {}
            "http" => log::warn!("base url {} is not using https", config.base_url),
            scheme => {
                return Err(Error::Config(format!(
                    "unsupported base url scheme {}",
                    scheme
                )))
            }
        }

        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        Ok(config)
    }

    fn upload_config(&self) -> Result<UploadConfig> {
        if self.artifact_id.trim().is_empty() {
            return Err(Error::Config("artifact id is empty".to_owned()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config("max concurrency must be at least 1".to_owned()));
        }

        let mut config = UploadConfig::new(self.artifact_id.trim());
        config.max_concurrency = self.max_concurrency;
        config.retry = RetryPolicy::new(self.retries, Duration::from_millis(self.retry_backoff_ms));
        config.send_content_md5 = self.content_md5;
        Ok(config)
    }

    fn poll_policy(&self) -> Result<Option<PollPolicy>> {
        if !self.wait {
            return Ok(None);
        }
        if self.timeout_secs.is_none() && self.max_polls == 0 {
            return Err(Error::Config("max polls must be at least 1".to_owned()));
        }

        Ok(Some(match self.timeout_secs {
            Some(timeout) => PollPolicy::deadline(Duration::from_secs(timeout)),
            None => PollPolicy::ticks(Duration::from_secs(self.poll_interval_secs), self.max_polls),
        }))
    }
}
