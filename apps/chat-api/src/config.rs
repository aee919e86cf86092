use std::time::Duration;

/// Chat service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Display name of the workspace this instance serves.
    pub workspace_name: String,
    /// Channel created at startup that every client joins.
    pub default_channel: String,
    /// Redis connection string. When unset, an in-process bus is used and
    /// messages do not cross instances.
    pub redis_url: Option<String>,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT").unwrap_or(4002),
            workspace_name: std::env::var("WORKSPACE_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "workspace".to_string()),
            default_channel: std::env::var("DEFAULT_CHANNEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "general".to_string()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            gateway: GatewayConfig::from_env(),
        }
    }
}

/// Per-connection timing and buffering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Upper bound on any single write to the peer.
    pub write_wait: Duration,
    /// Read deadline, extended each time the peer answers a ping.
    pub pong_wait: Duration,
    /// Keepalive ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection before senders block.
    pub mailbox_capacity: usize,
    /// How long fan-out waits on a full mailbox before evicting the member.
    pub slow_consumer_timeout: Duration,
}

const PING_NUMERATOR: u32 = 9;
const PING_DENOMINATOR: u32 = 10;
/// Floor for every timing window; a zero period would panic the keepalive timer.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

impl GatewayConfig {
    /// Windows shorter than 10ms are raised to it.
    pub fn new(write_wait: Duration, pong_wait: Duration) -> Self {
        let write_wait = write_wait.max(MIN_WAIT);
        let pong_wait = pong_wait.max(MIN_WAIT);
        Self {
            write_wait,
            pong_wait,
            ping_period: pong_wait * PING_NUMERATOR / PING_DENOMINATOR,
            max_message_size: 10_000,
            mailbox_capacity: 256,
            slow_consumer_timeout: write_wait,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let write_wait = parsed_var("WS_WRITE_WAIT_SECS")
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.write_wait);
        let pong_wait = parsed_var("WS_PONG_WAIT_SECS")
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.pong_wait);

        Self {
            max_message_size: parsed_var::<usize>("WS_MAX_MESSAGE_SIZE")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_message_size),
            mailbox_capacity: parsed_var::<usize>("WS_MAILBOX_CAPACITY")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.mailbox_capacity),
            ..Self::new(write_wait, pong_wait)
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(60))
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
