//! `first-auth` - sign in to First from a terminal
//!
//! Usage:
//!   first-auth login --email a@b.com     # password sign-in (FIRST_PASSWORD or prompt)
//!   first-auth google                    # Google sign-in in the system browser
//!   first-auth whoami                    # show the stored session
//!   first-auth logout                    # remove the stored session

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use first_auth::auth::{
    AuthorizationAgent, DeepLinkAgent, DeepLinkHandle, LoginManager, LoginView, LoopbackAgent,
    SecureStorage, SessionStore,
};
use first_auth::settings::AppConfig;
use first_auth::utils::{self, preview};
use first_auth::{AuthOutcome, Credentials};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "first-auth")]
#[command(about = "Sign in to First with a password or Google")]
struct Args {
    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        /// Prompted for when neither the flag nor FIRST_PASSWORD is set
        #[arg(short, long, env = "FIRST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign in with Google in the system browser
    Google,
    /// Show the stored session
    Whoami,
    /// Remove the stored session
    Logout,
}

/// Login view that prints to the terminal
struct ConsoleView;

impl LoginView for ConsoleView {
    fn alert(&self, message: &str) {
        println!("{}", message);
    }

    fn replace_route(&self, route: &str) {
        info!("Navigating to {} (replacing login)", route);
    }

    fn push_route(&self, route: &str) {
        info!("Navigating to {}", route);
    }

    fn go_back(&self) {
        info!("Navigating back");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    utils::init_logging(args.log_file.as_deref());

    let config = AppConfig::load().context("Failed to load configuration")?;
    let storage: Arc<dyn SessionStore> =
        Arc::new(SecureStorage::new().context("Failed to open session storage")?);

    match args.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_line("Password: ")?,
            };
            // Password sign-in never prompts the browser
            let (agent, _handle) = DeepLinkAgent::new(&config.redirect_scheme)?;
            let manager =
                LoginManager::new(&config, storage, Arc::new(agent), Arc::new(ConsoleView))?;
            let outcome = manager
                .submit_password(Credentials::new(email, password))
                .await;
            Ok(exit_code(&outcome))
        }
        Command::Google => {
            if !config.has_usable_client_id() {
                bail!(
                    "No Google OAuth client ID configured for {:?}; \
                     set the FIRST_GOOGLE_OAUTH_*_CLIENT_ID variables",
                    config.platform
                );
            }
            let agent = google_agent(&config)?;
            let manager = LoginManager::new(&config, storage, agent, Arc::new(ConsoleView))?;
            manager
                .mount()
                .await
                .context("Google sign-in is unavailable")?;

            println!("Complete sign-in in your browser...");
            let outcome = manager.submit_google().await;
            if let Some(preview) = manager.google_token_preview() {
                info!("{}", preview);
            }
            Ok(exit_code(&outcome))
        }
        Command::Whoami => {
            match storage.load().await? {
                Some(session) => {
                    println!("Signed in (token: {}...)", preview(&session.token, 8));
                    println!("{}", serde_json::to_string_pretty(&session.user)?);
                }
                None => println!("Not signed in"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            storage.clear().await?;
            println!("Signed out");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Loopback server on web/desktop, pasted deep links elsewhere
fn google_agent(config: &AppConfig) -> anyhow::Result<Arc<dyn AuthorizationAgent>> {
    if config.platform.uses_loopback_redirect() {
        let agent = LoopbackAgent::bind()?;
        let control = agent.control();
        println!("Press Enter to cancel.");
        std::thread::spawn(move || {
            let mut line = String::new();
            // EOF means there is no terminal to cancel from
            if matches!(io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
                control.cancel();
            }
        });
        return Ok(Arc::new(agent));
    }

    let (agent, handle) = DeepLinkAgent::new(&config.redirect_scheme)?;
    println!(
        "Paste the {}:// callback URL here once the browser redirects (empty line cancels):",
        config.redirect_scheme
    );
    std::thread::spawn(move || forward_deep_links(handle));
    Ok(Arc::new(agent))
}

/// Feed stdin lines to the deep link agent until the exchange ends
fn forward_deep_links(handle: DeepLinkHandle) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            handle.cancel();
            return;
        }
        match Url::parse(line) {
            Ok(url) => {
                if !handle.deliver(url) {
                    return;
                }
            }
            Err(e) => println!("Not a URL ({}), try again:", e),
        }
    }
    handle.dismiss();
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn exit_code(outcome: &AuthOutcome) -> ExitCode {
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
