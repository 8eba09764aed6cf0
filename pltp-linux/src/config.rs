//! Load config from file and environment.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use pltp_core::SessionConfig;

/// Daemon configuration. File: --config, ~/.config/pltp/config.toml or /etc/pltp/config.toml.
/// Env overrides: PLTP_LISTEN, PLTP_PEER, PLTP_INBOX, PLTP_OUTBOX.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the Sensor listens on (default 0.0.0.0:45700).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Address the Base dials to reach the Sensor (default 127.0.0.1:45700).
    #[serde(default = "default_peer")]
    pub peer: SocketAddr,
    /// Where received files are written.
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    /// Files a Sensor ships on every connection.
    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,
    /// Handshake window for `begin` (default 10 s).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Inactivity window for each receive (default 5 s).
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Warn when the session has not fed the watchdog for this long (default 60 s).
    #[serde(default = "default_watchdog_stall_ms")]
    pub watchdog_stall_ms: u64,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 45700))
}
fn default_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 45700))
}
fn default_inbox() -> PathBuf {
    PathBuf::from("inbox")
}
fn default_outbox() -> PathBuf {
    PathBuf::from("outbox")
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_receive_timeout_ms() -> u64 {
    5_000
}
fn default_watchdog_stall_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            peer: default_peer(),
            inbox: default_inbox(),
            outbox: default_outbox(),
            connect_timeout_ms: default_connect_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            watchdog_stall_ms: default_watchdog_stall_ms(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn watchdog_stall(&self) -> Duration {
        Duration::from_millis(self.watchdog_stall_ms)
    }
}

/// Load config: explicit path (must parse), else first config file found, else
/// defaults; then env vars on top.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => read(p)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn read(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(a) = var("PLTP_LISTEN").and_then(|s| s.parse().ok()) {
        c.listen = a;
    }
    if let Some(a) = var("PLTP_PEER").and_then(|s| s.parse().ok()) {
        c.peer = a;
    }
    if let Some(p) = var("PLTP_INBOX") {
        c.inbox = PathBuf::from(p);
    }
    if let Some(p) = var("PLTP_OUTBOX") {
        c.outbox = PathBuf::from(p);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/pltp/config.toml"));
    }
    out.push(PathBuf::from("/etc/pltp/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!("{e:#}; using defaults"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.peer, default_peer());
        assert_eq!(c.session, SessionConfig::default());
        assert_eq!(c.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_session_table() {
        let c: Config = toml::from_str(
            r#"
            peer = "10.0.0.7:45700"
            inbox = "/var/lib/pltp/inbox"
            receive_timeout_ms = 250

            [session]
            ack_window_ms = 1000
            content_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(c.peer, "10.0.0.7:45700".parse().unwrap());
        assert_eq!(c.inbox, PathBuf::from("/var/lib/pltp/inbox"));
        assert_eq!(c.receive_timeout(), Duration::from_millis(250));
        assert_eq!(c.session.ack_window_ms, 1000);
        assert_eq!(c.session.content_attempts, 5);
        assert_eq!(c.session.clock_attempts, 3);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
        assert!(toml::from_str::<Config>("[session]\nretries = 1").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "PLTP_PEER" => Some("192.168.1.20:9000".into()),
            "PLTP_OUTBOX" => Some("/data/logs".into()),
            "PLTP_LISTEN" => Some("not an address".into()),
            _ => None,
        });
        assert_eq!(c.peer, "192.168.1.20:9000".parse().unwrap());
        assert_eq!(c.outbox, PathBuf::from("/data/logs"));
        assert_eq!(c.listen, default_listen());
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.toml"))).is_err());
        let path = dir.path().join("pltp.toml");
        std::fs::write(&path, "connect_timeout_ms = 1500\n").unwrap();
        let c = read(&path).unwrap();
        assert_eq!(c.connect_timeout(), Duration::from_millis(1500));
    }
}
