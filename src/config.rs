use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DB_FILE: &str = "codes.db";
const CODES_FILE: &str = "codes.txt";

/// Main configuration structure that can be loaded from CLI, config file, or environment
///
/// Example configuration file content
/// # Codedrop Configuration
///
/// # Server configuration
/// listen_on_port = 32147
/// internal_port = 32148
/// workspace = "./data"
///
/// # Claim policy
/// max_claims_per_user = 1
///
/// # Import source (optional, defaults to <workspace>/codes.txt)
/// codes_file = "/srv/drops/launch-codes.txt"
///
/// # Admin API bearer token (optional; unset = open)
/// admin_token = "change-me"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port the claim API listens on
    #[arg(short, long, default_value_t = 32147)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Internal admin API port to listen on
    #[arg(long, default_value_t = 32148)]
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Working directory holding the database and default codes file
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Maximum successful claims per user (0 or negative disables the limit)
    #[arg(short, long, default_value_t = 1)]
    #[serde(default = "default_max_claims")]
    pub max_claims_per_user: i64,

    /// Codes file to import on startup (overrides <workspace>/codes.txt)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes_file: Option<String>,

    /// Bearer token required on the internal admin API
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            internal_port: default_internal_port(),
            workspace: default_workspace(),
            max_claims_per_user: default_max_claims(),
            codes_file: None,
            admin_token: None,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.internal_port == default_internal_port() {
            self.internal_port = file_config.internal_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.max_claims_per_user == default_max_claims() {
            self.max_claims_per_user = file_config.max_claims_per_user;
        }

        // For Option fields, CLI takes precedence if Some
        if self.codes_file.is_none() {
            self.codes_file = file_config.codes_file;
        }
        if self.admin_token.is_none() {
            self.admin_token = file_config.admin_token;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.workspace.is_empty() {
            return Err(anyhow::anyhow!("Workspace cannot be empty"));
        }
        if self.listen_on_port == self.internal_port {
            return Err(anyhow::anyhow!(
                "Claim API and internal API cannot share port {}",
                self.listen_on_port
            ));
        }
        if let Some(token) = &self.admin_token
            && token.is_empty()
        {
            return Err(anyhow::anyhow!("Admin token cannot be empty when set"));
        }
        if let Some(codes_file) = &self.codes_file
            && codes_file.is_empty()
        {
            return Err(anyhow::anyhow!("Codes file path cannot be empty when set"));
        }
        Ok(())
    }

    /// Path of the SQLite database inside the workspace
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.workspace).join(DB_FILE)
    }

    /// Path of the codes file to import on startup
    pub fn codes_path(&self) -> PathBuf {
        match &self.codes_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.workspace).join(CODES_FILE),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    32147
}

fn default_internal_port() -> u16 {
    32148
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_max_claims() -> i64 {
    1
}
