//! Command-line interface and layered configuration for the Libra server.
//!
//! Settings resolve in order: built-in defaults, `.libra.toml` in the
//! working directory, `LIBRA_*` environment variables, then flags given on
//! the command line. Only flags that were actually passed take part in the
//! last layer.

use anyhow::Result;
use argon2::Params;
use clap::{Args, Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Dotfile consulted for configuration.
pub const CONFIG_FILE: &str = ".libra.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "LIBRA_";

/// Arguments for the `create-librarian` administrative subcommand.
#[derive(Args, Deserialize, Serialize, Default, Debug, Clone)]
pub struct CreateLibrarianArgs {
    /// Login name of the new librarian.
    #[arg(long)]
    pub username: Option<String>,
    /// Password of the new librarian.
    #[arg(long)]
    pub password: Option<String>,
    /// Address that receives librarian reports.
    #[arg(long)]
    pub email: Option<String>,
}

/// CLI subcommands exposed by `libra`.
#[derive(Subcommand, Deserialize, Serialize, Debug, Clone)]
pub enum Commands {
    /// Create a librarian account.
    #[command(name = "create-librarian")]
    CreateLibrarian(CreateLibrarianArgs),
}

/// Resolved runtime configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// HTTP bind address.
    pub bind: String,
    /// SQLite database path.
    pub database: String,
    /// Root for book artifacts, reports and exports.
    pub data_dir: String,
    /// Token signing secret; a random one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Argon2 memory cost parameter.
    pub argon2_m_cost: u32,
    /// Argon2 time cost parameter.
    pub argon2_t_cost: u32,
    /// Argon2 parallelism cost parameter.
    pub argon2_p_cost: u32,
    /// SMTP relay; mail is kept in memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    /// SMTP user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
    /// SMTP password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,
    /// Sender address of outgoing mail.
    pub mail_from: String,
    /// Offset of local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Maximum number of memoized responses.
    pub cache_capacity: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_owned(),
            database: "libra.db".to_owned(),
            data_dir: "data".to_owned(),
            jwt_secret: None,
            argon2_m_cost: Params::DEFAULT_M_COST,
            argon2_t_cost: Params::DEFAULT_T_COST,
            argon2_p_cost: Params::DEFAULT_P_COST,
            smtp_host: None,
            smtp_username: None,
            smtp_password: None,
            mail_from: "libra@localhost".to_owned(),
            utc_offset_minutes: 330,
            cache_capacity: 1024,
        }
    }
}

/// Configuration flags. Every flag is optional so that unset flags do not
/// mask lower layers.
#[derive(Args, Serialize, Deserialize, Default, Debug, Clone)]
pub struct ConfigArgs {
    /// HTTP bind address.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// SQLite database path.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Root for book artifacts, reports and exports.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Token signing secret.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Argon2 memory cost parameter.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argon2_m_cost: Option<u32>,
    /// Argon2 time cost parameter.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argon2_t_cost: Option<u32>,
    /// Argon2 parallelism cost parameter.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argon2_p_cost: Option<u32>,
    /// SMTP relay host.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    /// SMTP user name.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
    /// SMTP password.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,
    /// Sender address of outgoing mail.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_from: Option<String>,
    /// Offset of local time from UTC, in minutes.
    #[arg(long, allow_hyphen_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    /// Maximum number of memoized responses.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<u64>,
}

/// Top-level CLI entry point consumed by the binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "libra", version, about)]
pub struct Cli {
    /// Configuration overrides.
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Optional subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl AppConfig {
    /// Merge every configuration layer under `overrides`.
    ///
    /// # Errors
    /// Returns an error if the dotfile is malformed or a value has the wrong
    /// type.
    pub fn load(overrides: &ConfigArgs) -> Result<Self> {
        let cfg = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides))
            .extract()?;
        Ok(cfg)
    }

    /// Parse `args` as a command line and resolve the configuration.
    ///
    /// # Errors
    /// Returns an error for unknown flags or any failure of [`Self::load`].
    pub fn load_from_iter<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Self::load(&cli.config)
    }
}
