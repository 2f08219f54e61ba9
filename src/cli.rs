//! Command-line interface definition for Authgate
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for login, status, capability checks, and logout.

use clap::{Parser, Subcommand};

/// Exit code returned by `check` when the capability is not granted.
pub const EXIT_DENIED: i32 = 2;

/// Authgate - OAuth2 PKCE login and capability checks
///
/// Obtains and caches a user access token through the browser and resolves
/// the user's capabilities from the directory service.
#[derive(Parser, Debug, Clone)]
#[command(name = "authgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "AUTHGATE_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Authgate
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Sign in through the browser and cache the token
    Login {
        /// Ignore any cached token and run the browser flow
        #[arg(short, long)]
        force: bool,
    },

    /// Show the cached token state
    Status,

    /// Check whether the signed-in user holds a capability
    ///
    /// Exits 0 when granted and 2 when denied.
    Check {
        /// Capability name, matched exactly
        capability: String,

        /// Action label used in the denial message
        #[arg(short, long)]
        action: Option<String>,
    },

    /// Delete the cached token
    Logout,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
