//! Host configuration.
//!
//! Loads a TOML file with `$VAR` / `${VAR}` environment expansion, then
//! applies environment overrides. A missing file falls back to built-in
//! defaults so a fresh install starts without any setup.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8765
//! data_dir = "~/.arca"
//!
//! [chains.ethereum]
//! rpc_urls = ["https://eth.llamarpc.com", "$ETH_RPC_FALLBACK"]
//! required_confirmations = 12
//!
//! [chains.solana]
//! rpc_urls = ["https://api.mainnet-beta.solana.com"]
//! broadcast_channels = ["https://relayer.example.com"]
//! required_confirmations = 32
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — path to the configuration file (default: `arca.toml`)
//! - `HOST` / `PORT` — override the MCP listener bind address
//! - `ARCA_DATA_DIR` — override the keystore data directory
//! - `RUN_MODE` — `test` switches chain adapters to deterministic mocks and
//!   disables background confirmation monitoring

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chain::{ChainRef, ChainSettings};
use crate::error::HostError;

/// Whether the host talks to live chains or deterministic mocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Live RPC endpoints, background confirmation monitoring on.
    #[default]
    Live,
    /// Mock chain adapters, no background monitoring.
    Test,
}

impl RunMode {
    /// Reads the mode from the `RUN_MODE` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("RUN_MODE") {
            Ok(v) if v.eq_ignore_ascii_case("test") => Self::Test,
            _ => Self::Live,
        }
    }

    /// True in test mode.
    #[must_use]
    pub const fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

/// Top-level host configuration, read-only after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// MCP listener bind address (default: `127.0.0.1`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// MCP listener port (default: `8765`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding encrypted wallet blobs and the wallet index.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Deadline for tool calls, seconds (default: 30).
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Deadline for resource reads, seconds (default: 10).
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout_secs: u64,

    /// Minimum accepted wallet password length (default: 8).
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,

    /// Per-chain settings keyed by canonical chain name. Chains absent from
    /// the file get built-in defaults.
    #[serde(default)]
    pub chains: HashMap<String, ChainSettings>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8765
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(".arca"),
        |home| PathBuf::from(home).join(".arca"),
    )
}

const fn default_tool_timeout() -> u64 {
    30
}

const fn default_resource_timeout() -> u64 {
    10
}

const fn default_min_password_len() -> usize {
    8
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            tool_timeout_secs: default_tool_timeout(),
            resource_timeout_secs: default_resource_timeout(),
            min_password_len: default_min_password_len(),
            chains: HashMap::new(),
        }
    }
}

impl HostConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `arca.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Configuration parse failures are fatal and abort startup.
    pub fn load() -> Result<Self, HostError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "arca.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Fails with [`HostError::Internal`] if the file exists but cannot be
    /// read or parsed.
    pub fn load_from(path: &str) -> Result<Self, HostError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)
                .map_err(|e| HostError::internal(format!("cannot read {path}: {e}")))?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)
            .map_err(|e| HostError::internal(format!("cannot parse {path}: {e}")))?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(dir) = std::env::var("ARCA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Settings for a chain: from the file when present, built-in defaults
    /// otherwise.
    #[must_use]
    pub fn chain_settings(&self, chain: ChainRef) -> ChainSettings {
        self.chains
            .get(chain.as_str())
            .cloned()
            .unwrap_or_else(|| ChainSettings::defaults_for(chain))
    }
}

/// Expands `$VAR` and `${VAR}` patterns from the process environment.
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = HostConfig::load_from("/nonexistent/arca.toml").unwrap();
        assert_eq!(config.port, 8765);
        assert_eq!(config.tool_timeout_secs, 30);
        assert_eq!(config.resource_timeout_secs, 10);
    }

    #[test]
    fn test_chain_defaults_applied() {
        let config = HostConfig::default();
        let eth = config.chain_settings(ChainRef::Ethereum);
        assert!(!eth.rpc_urls.is_empty());
        assert_eq!(eth.required_confirmations, 12);

        let sol = config.chain_settings(ChainRef::Solana);
        assert_eq!(sol.required_confirmations, 32);
    }

    #[test]
    fn test_parse_with_chain_section() {
        let toml = r#"
            port = 9000

            [chains.bsc]
            rpc_urls = ["https://bsc.example.com"]
            required_confirmations = 20
        "#;
        let config: HostConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 9000);
        let bsc = config.chain_settings(ChainRef::Bsc);
        assert_eq!(bsc.rpc_urls, vec!["https://bsc.example.com"]);
        assert_eq!(bsc.required_confirmations, 20);
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: no other thread reads the environment in this test binary
        // while the variable is set.
        unsafe {
            std::env::set_var("ARCA_TEST_RPC", "https://rpc.example.com");
        }
        let expanded = expand_env_vars("url = \"$ARCA_TEST_RPC\" and ${ARCA_TEST_RPC}");
        assert_eq!(
            expanded,
            "url = \"https://rpc.example.com\" and https://rpc.example.com"
        );
        let untouched = expand_env_vars("$DEFINITELY_NOT_SET_12345");
        assert_eq!(untouched, "$DEFINITELY_NOT_SET_12345");
    }
}
