mod env_vars;
mod store_config;

use std::path::Path;

use anyhow::Result;

// Re-export store configuration
pub use store_config::{Protocol, StoreConfig, StoreParams};

// Re-export environment variable functions
pub use env_vars::{params_from_env, params_from_lookup, parse_bool_flag};

/// Gather store parameters from every source, lowest precedence first:
/// optional YAML file, `S3_*` environment variables, command-line flags.
pub fn load_store_params(config_path: Option<&Path>, cli: StoreParams) -> Result<StoreParams> {
    let from_file = match config_path {
        Some(path) => StoreParams::from_yaml_file(path)?,
        None => StoreParams::default(),
    };
    let from_env = params_from_env()?;
    Ok(from_file.merge(from_env).merge(cli))
}
