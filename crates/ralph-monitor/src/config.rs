use clap::Parser;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HUB_URL: &str = "http://127.0.0.1:3000";

#[derive(Parser, Debug, Clone)]
#[command(name = "ralph-monitor", about = "Follow a ralph hub from the terminal")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub hub_url: String,
    /// Seconds between full snapshot pulls
    #[arg(long, default_value_t = 10)]
    pub poll_interval: u64,
    /// Seconds to wait before reconnecting the push channel
    #[arg(long, default_value_t = 3)]
    pub reconnect_delay: u64,
    #[arg(long, default_value_t = 30)]
    pub ping_interval: u64,
    /// Rely on snapshot pulls only
    #[arg(long, default_value_t = false)]
    pub no_push: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub hub_url: Url,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub push: bool,
    pub debug: bool,
}

pub fn load_config(args: Args) -> Result<MonitorConfig, url::ParseError> {
    Ok(MonitorConfig {
        hub_url: Url::parse(&resolve_hub_url(&args.hub_url))?,
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        ping_interval: Duration::from_secs(args.ping_interval),
        push: !args.no_push,
        debug: args.debug,
    })
}

fn resolve_hub_url(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = std::env::var("RALPH_HUB_URL") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_HUB_URL.to_string()
}
