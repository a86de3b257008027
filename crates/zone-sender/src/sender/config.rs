use crate::sender::{pool::PoolSettings, rewrite::SrsRewriter};
use clap::Parser;
use core::time::Duration;
use rand::Rng;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};
use zone_sender_core::{Error, ZoneDescriptor};

const DEFAULT_LOG_LEVEL: &str = "info";
const CLIENT_ID_BYTES: usize = 10;

/// Command line of the `zone-sender` binary.
///
/// Every argument can also be supplied through the environment (or a `.env`
/// file), which is how the supervising process usually launches senders.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "zone-sender",
    version,
    about = "Runs the delivery workers of one sending zone against a queue server"
)]
pub struct CliArgs {
    /// Name of the sending zone to serve. Matched case-insensitively.
    ///
    /// Environment variable: `SENDER_ZONE`
    #[arg(env = "SENDER_ZONE")]
    pub zone: Option<String>,

    /// Identity announced to the queue server. Random when omitted.
    ///
    /// Environment variable: `SENDER_CLIENT_ID`
    #[arg(env = "SENDER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Path of the JSON configuration file.
    ///
    /// Environment variable: `SENDER_CONFIG`
    #[arg(long, env = "SENDER_CONFIG", default_value = "config/sender.json")]
    pub config: PathBuf,

    /// Queue server as `host:port`, overriding the configuration file.
    ///
    /// Environment variable: `QUEUE_SERVER`
    #[arg(long, env = "QUEUE_SERVER")]
    pub queue_server: Option<String>,

    /// Log filter, e.g. `debug` or `zone_sender=trace`. `RUST_LOG` wins over
    /// this when set.
    ///
    /// Environment variable: `LOG_LEVEL`
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Contents of the configuration file.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FileConfig {
    pub queue_server: QueueServer,
    pub log: LogSection,
    pub srs: SrsSection,
    pub pool: PoolSection,
    pub zones: HashMap<String, ZoneSection>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QueueServer {
    pub host: String,
    pub port: u16,
}

impl Default for QueueServer {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2829,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct LogSection {
    pub level: Option<String>,
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct SrsSection {
    pub secret: String,
    pub rewrite_domain: String,
}

impl core::fmt::Debug for SrsSection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SrsSection")
            .field("rewrite_domain", &self.rewrite_domain)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PoolSection {
    pub startup_jitter_ms: u64,
    pub liveness_interval_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolSettings::default();
        Self {
            startup_jitter_ms: u64::try_from(defaults.startup_jitter.as_millis())
                .unwrap_or(u64::MAX),
            liveness_interval_secs: defaults.liveness_interval.as_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ZoneSection {
    #[serde(default = "default_connections")]
    pub connections: usize,
    #[serde(default)]
    pub log_level: Option<String>,
}

const fn default_connections() -> usize {
    5
}

impl FileConfig {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &std::path::Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::parse(&text).map_err(|e| Error::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Fully resolved settings of one sender process.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub zone: ZoneDescriptor,
    pub client_id: String,
    pub queue_server: String,
    pub log_level: String,
    pub rewriter: SrsRewriter,
    pub pool: PoolSettings,
}

impl TryFrom<CliArgs> for SenderConfig {
    type Error = Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let file = FileConfig::load(&args.config)?;
        Self::resolve(args, file)
    }
}

impl SenderConfig {
    /// Combines command line and file settings and resolves the zone.
    ///
    /// Fails with [`Error::UnknownZone`] when the zone name is empty or not
    /// configured. Nothing here touches the network.
    pub fn resolve(args: CliArgs, file: FileConfig) -> Result<Self, Error> {
        let name = args.zone.as_deref().unwrap_or_default().trim().to_lowercase();
        let Some(section) = (!name.is_empty()).then(|| file.zones.get(&name)).flatten() else {
            return Err(Error::UnknownZone { zone: name });
        };

        let zone = ZoneDescriptor {
            name: name.clone(),
            concurrency: section.connections,
            log_level: section.log_level.clone(),
        };

        let log_level = args
            .log_level
            .or_else(|| zone.log_level.clone())
            .or(file.log.level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned());

        let queue_server = args
            .queue_server
            .unwrap_or_else(|| format!("{}:{}", file.queue_server.host, file.queue_server.port));

        let client_id = args
            .client_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(random_client_id);

        let pool = PoolSettings {
            startup_jitter: Duration::from_millis(file.pool.startup_jitter_ms),
            liveness_interval: Duration::from_secs(file.pool.liveness_interval_secs.max(1)),
        };

        let rewrite_domain = if file.srs.rewrite_domain.is_empty() {
            file.queue_server.host
        } else {
            file.srs.rewrite_domain
        };

        Ok(Self {
            zone,
            client_id,
            queue_server,
            log_level,
            rewriter: SrsRewriter::new(file.srs.secret, rewrite_domain),
            pool,
        })
    }
}

fn random_client_id() -> String {
    let bytes: [u8; CLIENT_ID_BYTES] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"{
        "queue_server": { "host": "queue.internal", "port": 2900 },
        "log": { "level": "warn" },
        "srs": { "secret": "s3cret", "rewrite_domain": "bounces.example.com" },
        "pool": { "startup_jitter_ms": 250, "liveness_interval_secs": 60 },
        "zones": {
            "us": { "connections": 3 },
            "eu": { "log_level": "debug" }
        }
    }"#;

    fn args(zone: &str) -> CliArgs {
        CliArgs::parse_from(["zone-sender", zone])
    }

    fn file() -> FileConfig {
        FileConfig::parse(FILE).unwrap()
    }

    #[test]
    fn resolves_configured_zone() {
        let config = SenderConfig::resolve(args("  US "), file()).unwrap();
        assert_eq!(config.zone, ZoneDescriptor::new("us", 3));
        assert_eq!(config.queue_server, "queue.internal:2900");
        assert_eq!(config.log_level, "warn");
        assert_eq!(
            config.pool,
            PoolSettings {
                startup_jitter: Duration::from_millis(250),
                liveness_interval: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn zone_defaults_to_five_connections() {
        let config = SenderConfig::resolve(args("eu"), file()).unwrap();
        assert_eq!(config.zone.concurrency, 5);
    }

    #[test]
    fn unknown_or_missing_zone_is_rejected() {
        for zone in ["ap", "", "   "] {
            let err = SenderConfig::resolve(args(zone), file()).unwrap_err();
            assert!(matches!(err, Error::UnknownZone { .. }));
            assert_eq!(err.exit_code(), zone_sender_core::EXIT_UNKNOWN_ZONE);
        }
    }

    #[test]
    fn log_level_precedence() {
        // Command line beats the zone override.
        let cli = CliArgs::parse_from(["zone-sender", "eu", "--log-level", "trace"]);
        assert_eq!(SenderConfig::resolve(cli, file()).unwrap().log_level, "trace");

        // Zone override beats the file level.
        assert_eq!(SenderConfig::resolve(args("eu"), file()).unwrap().log_level, "debug");

        // Nothing configured falls back to info.
        let mut bare = file();
        bare.log.level = None;
        assert_eq!(SenderConfig::resolve(args("us"), bare).unwrap().log_level, "info");
    }

    #[test]
    fn explicit_client_id_and_queue_server_win() {
        let cli =
            CliArgs::parse_from(["zone-sender", "us", "mx-7", "--queue-server", "10.0.0.9:31"]);
        let config = SenderConfig::resolve(cli, file()).unwrap();
        assert_eq!(config.client_id, "mx-7");
        assert_eq!(config.queue_server, "10.0.0.9:31");
    }

    #[test]
    fn random_client_id_is_hex() {
        let config = SenderConfig::resolve(args("us"), file()).unwrap();
        assert_eq!(config.client_id.len(), CLIENT_ID_BYTES * 2);
        assert!(config.client_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_client_id(), random_client_id());
    }

    #[test]
    fn missing_or_malformed_file_is_invalid_config() {
        let missing = CliArgs::parse_from([
            "zone-sender",
            "us",
            "--config",
            "/nonexistent/zone-sender/sender.json",
        ]);
        let err = SenderConfig::try_from(missing).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(err.exit_code(), zone_sender_core::EXIT_INVALID_CONFIG);

        assert!(FileConfig::parse("{ \"zones\": [] }").is_err());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = FileConfig::parse("{}").unwrap();
        assert_eq!(file.queue_server.port, 2829);
        assert_eq!(file.pool.startup_jitter_ms, 1500);
        assert_eq!(file.pool.liveness_interval_secs, 300);
        assert!(file.zones.is_empty());
    }
}
