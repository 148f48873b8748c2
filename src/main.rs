use clap::Parser;
use std::time::Duration;
use tokio::signal;
use zju_chat_relay::config::{
    CredentialSource, DEFAULT_BASE_URL, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_TIMEOUT_SECS,
    RelayConfig, UpstreamConfig,
};
use zju_chat_relay::server::{init_logging, startup};

#[derive(Parser, Debug)]
#[command(name = "zju-chat-relay")]
#[command(about = "Relay browser chat requests to the ZJU chat-completion API")]
#[command(long_about = r#"
Relay browser chat requests to the ZJU chat-completion API.

The API key is read from ZJU_API_KEY and the default model from
DEFAULT_MODEL on every request, so both can change without a restart.
Variables in a .env file in the working directory are loaded at startup.
"#)]
struct CliArgs {
    /// Host address to bind the relay server
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the relay server
    #[arg(long, env = "PORT", default_value_t = 5001)]
    port: u16,

    /// Enable debug logging
    #[arg(long, env = "RELAY_DEBUG", default_value_t = false)]
    debug: bool,

    /// Base URL of the chat-completion API
    #[arg(long, env = "UPSTREAM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    upstream_base_url: String,

    /// Timeout for one upstream request, including the whole streamed body
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_PAYLOAD_SIZE", default_value_t = DEFAULT_MAX_PAYLOAD_SIZE)]
    max_payload_size: usize,
}

impl CliArgs {
    fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            port: self.port,
            debug: self.debug,
            max_payload_size: self.max_payload_size,
            upstream: UpstreamConfig {
                base_url: self.upstream_base_url.clone(),
                credential: CredentialSource::default(),
                timeout: Duration::from_secs(self.request_timeout_secs),
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    // .env must be loaded before clap reads the environment
    let dotenv_path = dotenv::dotenv().ok();
    let args = CliArgs::parse();
    let config = args.to_relay_config();

    init_logging(config.debug);
    if let Some(path) = dotenv_path {
        log::info!("Loaded environment from {}", path.display());
    }

    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            res = startup(config) => res?,
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down");
            }
        }
        anyhow::Ok(())
    })
}
