use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_REGION;
use crate::error::DetachError;
use crate::security::credential_scrubber::mask_secret;

/// Transport used to reach the store endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = DetachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(DetachError::InvalidParameter {
                name: "s3_protocol",
                reason: format!("expected http or https, got '{}'", other),
            }),
        }
    }
}

/// Store parameters as gathered from files, environment and flags.
///
/// Every field is optional here; [`StoreParams::validate`] turns a complete
/// set into an immutable [`StoreConfig`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParams {
    #[serde(default, alias = "s3_access_key_id")]
    pub access_key_id: Option<String>,
    #[serde(default, alias = "s3_secret_access_key")]
    pub secret_access_key: Option<String>,
    #[serde(default, alias = "s3_hostname")]
    pub hostname: Option<String>,
    #[serde(default, alias = "s3_bucket")]
    pub bucket: Option<String>,
    #[serde(default, alias = "s3_force_path_style")]
    pub force_path_style: Option<bool>,
    #[serde(default, alias = "s3_protocol")]
    pub protocol: Option<Protocol>,
    #[serde(default, alias = "s3_region")]
    pub region: Option<String>,
}

impl fmt::Debug for StoreParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreParams")
            .field("access_key_id", &self.access_key_id.as_deref().map(mask_secret))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "****"))
            .field("hostname", &self.hostname)
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .field("protocol", &self.protocol)
            .field("region", &self.region)
            .finish()
    }
}

impl StoreParams {
    /// Load parameters from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read S3 config file: {}", path.display()))?;

        let params: StoreParams = serde_yaml::from_str(&content)
            .context(format!("Failed to parse S3 config file: {}", path.display()))?;

        debug!("Loaded S3 parameters from {}", path.display());
        Ok(params)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: StoreParams) -> StoreParams {
        StoreParams {
            access_key_id: other.access_key_id.or(self.access_key_id),
            secret_access_key: other.secret_access_key.or(self.secret_access_key),
            hostname: other.hostname.or(self.hostname),
            bucket: other.bucket.or(self.bucket),
            force_path_style: other.force_path_style.or(self.force_path_style),
            protocol: other.protocol.or(self.protocol),
            region: other.region.or(self.region),
        }
    }

    /// Check that every required parameter is present and non-empty.
    pub fn validate(self) -> Result<StoreConfig, DetachError> {
        let access_key_id = required(self.access_key_id, "s3_access_key_id")?;
        let secret_access_key = required(self.secret_access_key, "s3_secret_access_key")?;
        let hostname = required(self.hostname, "s3_hostname")?;
        let bucket = required(self.bucket, "s3_bucket")?;

        if hostname.contains("://") {
            return Err(DetachError::InvalidParameter {
                name: "s3_hostname",
                reason: format!("'{}' must not include a scheme; set s3_protocol instead", hostname),
            });
        }

        let region = self
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(StoreConfig {
            access_key_id,
            secret_access_key,
            hostname,
            bucket,
            force_path_style: self.force_path_style.unwrap_or(false),
            protocol: self.protocol.unwrap_or_default(),
            region,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, DetachError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DetachError::Config(name)),
    }
}

/// Validated store configuration, shared read-only by all workers.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    access_key_id: String,
    secret_access_key: String,
    hostname: String,
    bucket: String,
    force_path_style: bool,
    protocol: Protocol,
    region: String,
}

impl StoreConfig {
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn force_path_style(&self) -> bool {
        self.force_path_style
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint URL, e.g. `https://storage.example.com`.
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.hostname)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("access_key_id", &mask_secret(&self.access_key_id))
            .field("secret_access_key", &"****")
            .field("hostname", &self.hostname)
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .field("protocol", &self.protocol)
            .field("region", &self.region)
            .finish()
    }
}
