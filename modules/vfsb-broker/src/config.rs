//! Startup configuration (§4.7): three optional environment variables, each
//! with a default matching the wire protocol's own limits so the broker
//! runs with zero configuration. A malformed value is warned about and the
//! default is kept — this is the one place the broker treats bad input as
//! operator error rather than adversarial wire traffic (§7).

use log::warn;

pub const DEFAULT_TASK_NAME: &str = "VFS";
pub const DEFAULT_RECV_BUFFER: usize = 24 * 1024;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub struct Config {
    pub task_name: String,
    pub recv_buffer: usize,
    pub log_level: String,
}

impl Config {
    /// Reads `VFSB_TASK_NAME`, `VFSB_RECV_BUFFER`, `VFSB_LOG_LEVEL` from the
    /// process environment, falling back to defaults on absence or parse
    /// failure.
    pub fn from_env() -> Self {
        Self {
            task_name: std::env::var("VFSB_TASK_NAME").unwrap_or_else(|_| DEFAULT_TASK_NAME.to_owned()),
            recv_buffer: parse_env_or_default("VFSB_RECV_BUFFER", DEFAULT_RECV_BUFFER),
            log_level: std::env::var("VFSB_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_owned()),
        }
    }
}

fn parse_env_or_default(var: &str, default: usize) -> usize {
    match std::env::var(var) {
        Err(_) => default,
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("{} = {:?} is not a valid size, using default {}", var, raw, default);
                default
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_protocol_limits() {
        assert_eq!(DEFAULT_TASK_NAME, "VFS");
        assert_eq!(DEFAULT_RECV_BUFFER, 24576);
        assert_eq!(DEFAULT_LOG_LEVEL, "info");
    }

    #[test]
    fn malformed_recv_buffer_falls_back_to_default() {
        assert_eq!(parse_env_or_default("VFSB_NONEXISTENT_VAR_FOR_TEST", 123), 123);
    }
}
