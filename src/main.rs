//! Authgate - OAuth2 PKCE login and capability checks
//!
#![doc = "Main entry point for the Authgate command-line tool."]

use anyhow::Result;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use authgate::auth::token_cache::TokenCache;
use authgate::cli::{Cli, Commands, EXIT_DENIED};
use authgate::{AccessDecision, AuthConfig, AuthorizationGuard};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let mut config = AuthConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { force } => {
            if force {
                config.force_reauth = true;
            }
            tracing::info!("Starting login");
            let guard = AuthorizationGuard::from_config(config)?;
            guard.ensure_token().await?;

            let capabilities = guard.capabilities().await;
            println!("{}", "Logged in.".green());
            if capabilities.is_empty() {
                println!("{}", "No capabilities granted.".yellow());
            } else {
                println!("Capabilities: {}", capabilities);
            }
            Ok(())
        }
        Commands::Status => {
            let cache = TokenCache::from_config(&config).with_force_reauth(false);
            print_status(&cache);
            Ok(())
        }
        Commands::Check { capability, action } => {
            let action = action.unwrap_or_else(|| format!("use '{capability}'"));
            let guard = AuthorizationGuard::from_config(config)?;

            match guard.check_capability(&capability, &action).await {
                AccessDecision::Granted => {
                    println!("{}", format!("Granted: {capability}").green());
                    Ok(())
                }
                denied @ AccessDecision::Denied { .. } => {
                    println!("{}", denied.to_string().red());
                    std::process::exit(EXIT_DENIED);
                }
                login @ AccessDecision::LoginRequired { .. } => {
                    eprintln!("{}", login.to_string().red());
                    std::process::exit(1);
                }
            }
        }
        Commands::Logout => {
            let cache = TokenCache::from_config(&config);
            cache.clear()?;
            println!("Removed cached token at {}", cache.path().display());
            Ok(())
        }
    }
}

fn print_status(cache: &TokenCache) {
    println!("Token cache: {}", cache.path().display());

    let Some(record) = cache.load() else {
        println!("{}", "Not logged in.".yellow());
        return;
    };

    if cache.is_valid(&record) {
        println!("{}", "Token valid.".green());
    } else if record.refresh_token.is_some() {
        println!("{}", "Token expired; refresh token available.".yellow());
    } else {
        println!("{}", "Token expired.".red());
    }
    println!("Expires at: {}", record.expires_at().to_rfc3339());
    if let Some(scope) = &record.scope {
        println!("Scope: {}", scope);
    }
    if let Some(claims) = record.subject_claims() {
        if let Some(who) = claims.candidate_identifiers().first() {
            println!("Subject: {}", who);
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "authgate=debug" } else { "authgate=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
