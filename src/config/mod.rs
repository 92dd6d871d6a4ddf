//! Configuration module for the proxy server.
//!
//! - [`types`]: configuration types
//! - [`validate`]: validation and conversion into proxy options
//!
//! A config file holds either a single server or a list of servers.

mod types;
mod validate;

pub use types::*;
pub use validate::{ProxyServerConfig, create_server_config, create_server_configs};

use crate::option_util::OneOrSome;

/// Loads configuration files from the provided paths.
///
/// Reads each file, parses it as YAML, and returns the combined list of configs.
pub async fn load_configs(args: &[String]) -> std::io::Result<Vec<ServerConfig>> {
    let mut all_configs = vec![];
    for config_filename in args {
        let config_bytes = match tokio::fs::read(config_filename).await {
            Ok(b) => b,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not read config file {config_filename}: {e}"),
                ));
            }
        };

        let config_str = match String::from_utf8(config_bytes) {
            Ok(s) => s,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as UTF8: {e}"),
                ));
            }
        };

        let mut configs = parse_configs(&config_str).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Could not parse config file {config_filename} as config YAML: {e}"),
            )
        })?;
        all_configs.append(&mut configs)
    }

    Ok(all_configs)
}

pub fn parse_configs(config_str: &str) -> Result<Vec<ServerConfig>, serde_yaml::Error> {
    serde_yaml::from_str::<OneOrSome<ServerConfig>>(config_str).map(OneOrSome::into_vec)
}
