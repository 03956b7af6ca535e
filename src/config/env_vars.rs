use crate::config::store_config::StoreParams;
use crate::constants::{
    ENV_ACCESS_KEY_ID, ENV_BUCKET, ENV_FORCE_PATH_STYLE, ENV_HOSTNAME, ENV_PROTOCOL, ENV_REGION,
    ENV_SECRET_ACCESS_KEY,
};
use crate::error::DetachError;

/// Parse a boolean flag the way shells usually spell them
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read store parameters from `S3_*` environment variables.
///
/// Unset or empty variables leave the field unset so that lower-precedence
/// sources still apply.
pub fn params_from_env() -> Result<StoreParams, DetachError> {
    params_from_lookup(|name| std::env::var(name).ok())
}

/// Same as [`params_from_env`] with an injectable variable lookup.
pub fn params_from_lookup<F>(lookup: F) -> Result<StoreParams, DetachError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let force_path_style = match get(ENV_FORCE_PATH_STYLE) {
        Some(raw) => Some(parse_bool_flag(&raw).ok_or_else(|| DetachError::InvalidParameter {
            name: "s3_force_path_style",
            reason: format!("{}='{}' is not a boolean", ENV_FORCE_PATH_STYLE, raw),
        })?),
        None => None,
    };

    let protocol = match get(ENV_PROTOCOL) {
        Some(raw) => Some(raw.parse()?),
        None => None,
    };

    Ok(StoreParams {
        access_key_id: get(ENV_ACCESS_KEY_ID),
        secret_access_key: get(ENV_SECRET_ACCESS_KEY),
        hostname: get(ENV_HOSTNAME),
        bucket: get(ENV_BUCKET),
        force_path_style,
        protocol,
        region: get(ENV_REGION),
    })
}
