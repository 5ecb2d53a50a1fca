use crate::s3::client::{validate_endpoint, ClientOptions};
use crate::s3::signer::Credentials;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// S3 profile: one endpoint and the credentials to sign with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Endpoint URL, `http(s)://host[:port]`
    pub endpoint: String,

    /// AWS access key ID
    pub access_key: String,

    /// AWS secret access key
    pub secret_key: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Client-wide settings shared by every profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Application name appended to the user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            app_name: None,
            app_version: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named profiles for different S3 deployments
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Client settings
    #[serde(default)]
    pub client: ClientSettings,

    /// Profile used when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by name, or the default profile if not specified
    pub fn get_profile(&self, name: Option<&str>) -> Option<&Profile> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else {
            self.profiles.values().next()
        }
    }

    /// Build client options for a profile
    pub fn client_options(&self, name: Option<&str>) -> Result<ClientOptions> {
        let profile = self
            .get_profile(name)
            .with_context(|| match name {
                Some(name) => format!("Profile '{}' not found", name),
                None => "No profile configured".to_string(),
            })?;
        ClientOptions::from_profile(profile, &self.client)
            .with_context(|| format!("Invalid profile for endpoint {}", profile.endpoint))
    }

    /// Check every profile's endpoint
    pub fn validate(&self) -> Result<()> {
        for (name, profile) in &self.profiles {
            validate_endpoint(&profile.endpoint)
                .with_context(|| format!("Profile '{}' has an invalid endpoint", name))?;
        }
        Ok(())
    }
}

impl ClientOptions {
    /// Options for a configured profile: endpoint, credentials, region,
    /// timeout and user agent are all fixed here
    pub fn from_profile(profile: &Profile, settings: &ClientSettings) -> crate::s3::Result<Self> {
        let credentials = Credentials::new(profile.access_key.clone(), profile.secret_key.clone());
        let mut options = ClientOptions::new(&profile.endpoint, credentials)?
            .with_region(profile.region.clone())
            .with_timeout(Duration::from_secs(settings.request_timeout_secs));
        if let (Some(name), Some(version)) = (&settings.app_name, &settings.app_version) {
            options = options.with_app_info(name, version);
        }
        Ok(options)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Supports both AWS standard variables and short forms:
/// - S3_ENDPOINT
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - AWS_REGION (optional, defaults to us-east-1)
/// - S3PUSH_APP_NAME / S3PUSH_APP_VERSION (optional)
/// - S3PUSH_REQUEST_TIMEOUT (optional, seconds)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::new();

    let endpoint = std::env::var("S3_ENDPOINT")
        .context("S3_ENDPOINT environment variable not set")?;

    // Load credentials (support both AWS standard and short format)
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("S3_KEY"))
        .context("Neither AWS_ACCESS_KEY_ID nor S3_KEY environment variable is set")?;

    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("S3_SECRET"))
        .context("Neither AWS_SECRET_ACCESS_KEY nor S3_SECRET environment variable is set")?;

    // Optional region (defaults to us-east-1)
    let region = std::env::var("AWS_REGION")
        .unwrap_or_else(|_| "us-east-1".to_string());

    let profile = Profile {
        endpoint: endpoint.trim().to_string(),
        access_key,
        secret_key,
        region,
    };

    config.profiles.insert("default".to_string(), profile);
    config.default_profile = Some("default".to_string());

    config.client.app_name = std::env::var("S3PUSH_APP_NAME").ok();
    config.client.app_version = std::env::var("S3PUSH_APP_VERSION").ok();

    if let Ok(timeout) = std::env::var("S3PUSH_REQUEST_TIMEOUT") {
        config.client.request_timeout_secs = timeout
            .trim()
            .parse()
            .with_context(|| format!("S3PUSH_REQUEST_TIMEOUT is not a number: {:?}", timeout))?;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from file or environment
///
/// This is a convenience function that tries to load from a YAML file first,
/// then falls back to environment variables if no file is specified.
///
/// # Arguments
/// * `config_path` - Optional path to YAML config file
/// * `profile_name` - Optional profile name to use (only relevant for YAML configs)
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        // If a specific profile is requested, make it the default
        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
