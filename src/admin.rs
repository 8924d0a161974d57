//! Admin Console
//!
//! Operator command loop for whitelist changes, run in its own task beside
//! the relay server. Commands are whitespace-separated and case-sensitive:
//!
//! - `add <ip> <count>`: whitelist `<ip>` with a quota of `<count>` requests
//! - `remove <ip>`: drop `<ip>` from the whitelist
//! - `help`: print the command forms
//!
//! Malformed lines are ignored and the loop keeps going; the console never
//! exits on bad input. Store failures are reported and logged, then the loop
//! continues.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::metrics;
use crate::whitelist::WhitelistStore;

const PROMPT: &str = "> Enter command (help for help): ";

const HELP_TEXT: &str = "\n  add [ip] [count]  -> Add an IP address to the whitelist with a request quota\n  remove [ip]       -> Remove an IP address from the whitelist\n\n";

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Whitelist a client with a quota
    Add { client_id: String, max_requests: u64 },

    /// Remove a client
    Remove { client_id: String },

    /// Print usage
    Help,

    /// Any other first token
    Unknown(String),
}

/// Parse one console line.
///
/// Returns `None` for lines that are silently ignored: blank lines, `add`
/// or `remove` with missing tokens, and `add` with a count that is not a
/// non-negative integer. Extra trailing tokens are ignored.
pub fn parse_command(line: &str) -> Option<AdminCommand> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next()?;

    match command {
        "help" => Some(AdminCommand::Help),
        "add" => {
            let client_id = tokens.next()?;
            let max_requests = tokens.next()?.parse().ok()?;
            Some(AdminCommand::Add {
                client_id: client_id.to_string(),
                max_requests,
            })
        }
        "remove" => {
            let client_id = tokens.next()?;
            Some(AdminCommand::Remove {
                client_id: client_id.to_string(),
            })
        }
        other => Some(AdminCommand::Unknown(other.to_string())),
    }
}

/// Interactive whitelist administration loop
#[derive(Debug, Clone)]
pub struct AdminConsole {
    store: Arc<WhitelistStore>,
    startup_delay: Duration,
    command_pause: Duration,
}

impl AdminConsole {
    /// Create a console over a shared store
    pub fn new(store: Arc<WhitelistStore>) -> Self {
        Self {
            store,
            startup_delay: Duration::from_secs(3),
            command_pause: Duration::from_secs(1),
        }
    }

    /// Set the delay before the first prompt
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the pause after each processed command
    pub fn with_command_pause(mut self, pause: Duration) -> Self {
        self.command_pause = pause;
        self
    }

    /// Run against the process's stdin and stdout
    pub async fn run_stdio(self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.run(stdin, tokio::io::stdout()).await
    }

    /// Read commands from `input` until EOF, writing prompts and replies to
    /// `output`. Only a failure of `input` or `output` ends the loop early.
    pub async fn run<R, W>(self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tokio::time::sleep(self.startup_delay).await;
        info!("Admin console ready");

        let mut lines = input.lines();
        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                info!("Admin console input closed");
                return Ok(());
            };

            let Some(command) = parse_command(&line) else {
                debug!(line = %line, "Ignoring malformed admin command");
                continue;
            };

            let reply = self.execute(command).await;
            output.write_all(reply.as_bytes()).await?;
            output.flush().await?;

            tokio::time::sleep(self.command_pause).await;
        }
    }

    /// Apply one command and return the text to show the operator
    pub async fn execute(&self, command: AdminCommand) -> String {
        match command {
            AdminCommand::Help => HELP_TEXT.to_string(),
            AdminCommand::Add {
                client_id,
                max_requests,
            } => match self.store.add(&client_id, max_requests).await {
                Ok(true) => {
                    metrics::WHITELIST_MUTATIONS_TOTAL
                        .with_label_values(&["add"])
                        .inc();
                    format!("[!] Added {client_id} with a quota of {max_requests} requests\n")
                }
                Ok(false) => {
                    format!("[!] {client_id} is already whitelisted, quota unchanged\n")
                }
                Err(e) => {
                    error!(client_id = %client_id, error = %e, "Admin add failed");
                    format!("[X] Failed to add {client_id}: {e}\n")
                }
            },
            AdminCommand::Remove { client_id } => match self.store.remove(&client_id).await {
                Ok(removed) => {
                    if removed {
                        metrics::WHITELIST_MUTATIONS_TOTAL
                            .with_label_values(&["remove"])
                            .inc();
                    }
                    format!("[!] Removed {client_id}\n")
                }
                Err(e) => {
                    error!(client_id = %client_id, error = %e, "Admin remove failed");
                    format!("[X] Failed to remove {client_id}: {e}\n")
                }
            },
            AdminCommand::Unknown(_) => "[X] Unknown command\n".to_string(),
        }
    }
}
