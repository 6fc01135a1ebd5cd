use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::fwd::{FwdControl, FwdMode};
use crate::rate_limiter::RateLimitConfig;

/// Process configuration, layered: built-in defaults, then the TOML file,
/// then `BIFROST_*` environment variables, then CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the UDP DNS front-end binds to.
    pub bind_dns: SocketAddr,

    /// Management HTTP bind address (None = disabled).
    pub bind_http: Option<SocketAddr>,

    /// Forwarding mode: disable, direct or cache.
    pub fwd_mode: FwdMode,

    /// Per-query upstream timeout in seconds.
    pub fwd_timeout: u64,

    /// Default upstream list: comma-separated host[:port].
    pub fwd_def_addrs: String,

    /// Per-zone upstream lists: %-separated zone@host[:port][,host...]
    pub fwd_zones_addrs: String,

    /// Forwarding worker threads.
    pub fwd_threads: usize,

    /// Packet pipeline threads.
    pub slave_threads: usize,

    /// Per-source queries per second across all traffic (0 = unlimited).
    pub all_per_second: u32,

    /// Per-source forwarded queries per second (0 = unlimited).
    pub fwd_per_second: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_dns: "0.0.0.0:53".parse().expect("default bind address is valid"),
            bind_http: Some(
                "127.0.0.1:8080"
                    .parse()
                    .expect("default HTTP bind address is valid"),
            ),
            fwd_mode: FwdMode::Cache,
            fwd_timeout: 2,
            fwd_def_addrs: "1.1.1.1,8.8.8.8".to_string(),
            fwd_zones_addrs: String::new(),
            fwd_threads: 2,
            slave_threads: 1,
            all_per_second: 0,
            fwd_per_second: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        toml::from_str(&text)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))
    }

    /// Overlay `BIFROST_*` environment variables. Unparsable values are
    /// ignored with a warning rather than killing startup.
    pub fn apply_env(&mut self) {
        fn overlay<T: std::str::FromStr>(name: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                match raw.parse() {
                    Ok(v) => *slot = v,
                    Err(_) => warn!(var = name, value = %raw, "ignoring unparsable env override"),
                }
            }
        }
        overlay("BIFROST_BIND_DNS", &mut self.bind_dns);
        overlay("BIFROST_FWD_TIMEOUT", &mut self.fwd_timeout);
        overlay("BIFROST_FWD_DEF_ADDRS", &mut self.fwd_def_addrs);
        overlay("BIFROST_FWD_ZONES_ADDRS", &mut self.fwd_zones_addrs);
        overlay("BIFROST_FWD_THREADS", &mut self.fwd_threads);
        overlay("BIFROST_SLAVE_THREADS", &mut self.slave_threads);
        overlay("BIFROST_ALL_PER_SECOND", &mut self.all_per_second);
        overlay("BIFROST_FWD_PER_SECOND", &mut self.fwd_per_second);
        overlay("BIFROST_FWD_MODE", &mut self.fwd_mode);
        if let Ok(raw) = std::env::var("BIFROST_BIND_HTTP") {
            match raw.parse() {
                Ok(addr) => self.bind_http = Some(addr),
                Err(_) => warn!(value = %raw, "ignoring unparsable BIFROST_BIND_HTTP"),
            }
        }
    }

    /// Parse the upstream syntax into the runtime forwarding policy.
    pub fn fwd_control(&self) -> Result<FwdControl, ConfigError> {
        FwdControl::parse(
            self.fwd_mode,
            self.fwd_timeout,
            &self.fwd_def_addrs,
            &self.fwd_zones_addrs,
        )
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            all_per_second: self.all_per_second,
            fwd_per_second: self.fwd_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.fwd_mode, FwdMode::Cache);
        assert_eq!(cfg.fwd_timeout, 2);
        assert!(cfg.fwd_control().is_ok());
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
fwd_mode = "direct"
fwd_def_addrs = "10.0.0.1:1053"
fwd_per_second = 10
"#
        )
        .unwrap();

        let cfg = Config::from_file(f.path()).unwrap();
        assert_eq!(cfg.fwd_mode, FwdMode::Direct);
        assert_eq!(cfg.fwd_def_addrs, "10.0.0.1:1053");
        assert_eq!(cfg.fwd_per_second, 10);
        // untouched fields keep defaults
        assert_eq!(cfg.fwd_threads, 2);

        let ctrl = cfg.fwd_control().unwrap();
        assert_eq!(ctrl.mode, FwdMode::Direct);
        assert_eq!(
            ctrl.default_addrs.addrs[0],
            "10.0.0.1:1053".parse().unwrap()
        );
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "fwd_mode = \"turbo\"").unwrap();
        assert!(matches!(
            Config::from_file(f.path()),
            Err(ConfigError::Parse(_, _))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/bifrost.toml")),
            Err(ConfigError::Read(_, _))
        ));
    }

    #[test]
    fn env_overlay_applies() {
        // set_var is unsafe in edition 2024; this test is the only writer of
        // this variable.
        unsafe { std::env::set_var("BIFROST_FWD_TIMEOUT", "9") };
        let mut cfg = Config::default();
        cfg.apply_env();
        unsafe { std::env::remove_var("BIFROST_FWD_TIMEOUT") };
        assert_eq!(cfg.fwd_timeout, 9);
    }
}
