//! Agent configuration: defaults, `HOSTPULSE_*` environment overrides and CLI flags.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub collector: CollectorConfig,
    pub terminal: TerminalConfig,
}

/// Cadences and limits of the telemetry collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub stats_interval: Duration,
    pub processes_interval: Duration,
    pub storage_interval: Duration,
    /// Pause before an out-of-cadence process refresh, so signal delivery settles.
    pub refresh_grace: Duration,
    /// Gap between the two `/proc/stat` reads when no previous sample exists.
    pub cpu_window: Duration,
    pub command_timeout: Duration,
    pub process_limit: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(2),
            processes_interval: Duration::from_secs(5),
            storage_interval: Duration::from_secs(60),
            refresh_grace: Duration::from_millis(250),
            cpu_window: Duration::from_millis(500),
            command_timeout: Duration::from_secs(10),
            process_limit: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalConfig {
    pub shell: String,
    pub term: String,
    pub default_cols: u16,
    pub default_rows: u16,
    pub session_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/bin/bash".into()),
            term: "xterm-color".into(),
            default_cols: 80,
            default_rows: 30,
            session_timeout: Duration::from_secs(15 * 60),
            reap_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            collector: CollectorConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key)
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl AgentConfig {
    /// Defaults with `HOSTPULSE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(bind) = env_parse("HOSTPULSE_BIND") {
            cfg.bind = bind;
        }
        if let Some(port) = env_parse("HOSTPULSE_PORT") {
            cfg.port = port;
        }

        let c = &mut cfg.collector;
        c.stats_interval = env_millis("HOSTPULSE_STATS_INTERVAL_MS", c.stats_interval);
        c.processes_interval = env_millis("HOSTPULSE_PROCESSES_INTERVAL_MS", c.processes_interval);
        c.storage_interval = env_millis("HOSTPULSE_STORAGE_INTERVAL_MS", c.storage_interval);
        c.refresh_grace = env_millis("HOSTPULSE_REFRESH_GRACE_MS", c.refresh_grace);
        c.cpu_window = env_millis("HOSTPULSE_CPU_WINDOW_MS", c.cpu_window);
        c.command_timeout = env_millis("HOSTPULSE_COMMAND_TIMEOUT_MS", c.command_timeout);
        if let Some(limit) = env_parse::<usize>("HOSTPULSE_PROCESS_LIMIT").filter(|n| *n > 0) {
            c.process_limit = limit;
        }

        let t = &mut cfg.terminal;
        t.session_timeout = env_secs("HOSTPULSE_SESSION_TIMEOUT_SECS", t.session_timeout);
        t.reap_interval = env_secs("HOSTPULSE_REAP_INTERVAL_SECS", t.reap_interval);
        if let Ok(shell) = std::env::var("HOSTPULSE_SHELL") {
            if !shell.is_empty() {
                t.shell = shell;
            }
        }
        if let Ok(term) = std::env::var("HOSTPULSE_TERM") {
            if !term.is_empty() {
                t.term = term;
            }
        }
        cfg
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Applies command-line flags on top of `self`.
    ///
    /// Returns `Err(usage)` for `--help` or an unknown argument. Flag values that
    /// do not parse leave the current setting untouched.
    pub fn apply_args<I: IntoIterator<Item = String>>(mut self, args: I) -> Result<Self, String> {
        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "hostpulse_agent".into());
        let usage = format!("Usage: {prog} [--port PORT|-p PORT] [--bind ADDR|-b ADDR]");

        let mut port: Option<String> = None;
        let mut bind: Option<String> = None;
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "-h" | "--help" => return Err(usage),
                "--port" | "-p" => port = it.next(),
                "--bind" | "-b" => bind = it.next(),
                _ if arg.starts_with("--port=") => {
                    port = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ if arg.starts_with("--bind=") => {
                    bind = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ => return Err(format!("Unexpected argument '{arg}'. {usage}")),
            }
        }

        if let Some(p) = port.and_then(|s| s.parse::<u16>().ok()) {
            self.port = p;
        }
        if let Some(b) = bind.and_then(|s| s.parse::<IpAddr>().ok()) {
            self.bind = b;
        }
        Ok(self)
    }
}
