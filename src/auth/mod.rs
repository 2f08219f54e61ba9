//! OAuth2 Authorization Code + PKCE client
//!
//! - [`pkce`] -- verifier/challenge and state nonce generation
//! - [`callback`] -- ephemeral local redirect listener
//! - [`exchange`] -- token endpoint client (code and refresh grants)
//! - [`token_cache`] -- persisted token record with expiry checks
//! - [`claims`] -- subject identity claims from issued tokens
//! - [`session`] -- in-memory session phase and capabilities

pub mod callback;
pub mod claims;
pub mod exchange;
pub mod pkce;
pub mod session;
pub mod token_cache;

/// Presents the authorization URL to the user.
///
/// Implementations must not block waiting for the user; the caller waits on
/// the callback listener.
pub trait BrowserLauncher: Send + Sync {
    /// Opens `url` for the user to sign in.
    fn open(&self, url: &str);
}

/// Prints the URL to stderr and tries the platform browser opener.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) {
        eprintln!("Open the following URL in your browser to sign in:\n\n  {url}\n");

        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(url).spawn();
        }
        #[cfg(target_os = "windows")]
        {
            let _ = std::process::Command::new("cmd")
                .args(["/C", "start", "", url])
                .spawn();
        }
    }
}
