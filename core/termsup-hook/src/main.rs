//! termsup-hook: forwards shell, AI-tool and focus events to the termsup daemon.
//!
//! Called from shell precmd/preexec hooks, AI-tool hook configuration and
//! terminal focus scripts. Every subcommand is one daemon request.
//!
//! ## Subcommands
//!
//! - `shell-start`: a command began in the pane
//! - `shell-end`: the command finished with an exit code
//! - `agent`: an AI-tool hook event, JSON body on stdin
//! - `content`: a captured pane snapshot on stdin
//! - `focus`: the user focused a pane (or cleared focus)
//! - `status`: print the pane's current status as JSON
//!
//! The pane argument may be omitted; it then comes from `TERMSUP_PANE_ID`,
//! `TMUX_PANE` or `ITERM_SESSION_ID`.

mod daemon_client;
mod events;
mod logging;

use clap::{Parser, Subcommand};
use std::env;
use std::io::{self, Read};

#[derive(Parser)]
#[command(name = "termsup-hook")]
#[command(about = "Terminal pane status hook")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// A shell command started
    ShellStart {
        #[arg(long)]
        pane: Option<String>,

        /// Command line as typed
        #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// A shell command finished
    ShellEnd {
        #[arg(long)]
        pane: Option<String>,

        #[arg(value_name = "EXIT_CODE", allow_hyphen_values = true)]
        exit_code: i32,
    },

    /// Forward an AI-tool hook event (reads JSON from stdin)
    Agent {
        #[arg(long)]
        pane: Option<String>,

        /// Hook source (claude-code, gemini, codex)
        #[arg(long, default_value = "claude-code")]
        source: String,

        /// Event type, when the hook body does not carry one
        #[arg(long)]
        event: Option<String>,
    },

    /// Submit captured pane text (reads text from stdin)
    Content {
        #[arg(long)]
        pane: Option<String>,

        #[arg(long)]
        job_name: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        command_line: Option<String>,
    },

    /// Report user focus on a pane
    Focus {
        #[arg(long)]
        pane: Option<String>,

        /// Clear focus instead of setting it
        #[arg(long, conflicts_with = "pane")]
        clear: bool,
    },

    /// Print the pane's current status
    Status {
        #[arg(long)]
        pane: Option<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(error = %err, "termsup-hook failed");
            std::process::exit(1);
        }
    }
}

fn run(command: Commands) -> Result<Option<String>, String> {
    match command {
        Commands::ShellStart { pane, command } => {
            let pane = pane_or_env(pane)?;
            let envelope = events::shell_start(&pane, &command);
            forward_event(&envelope)
        }
        Commands::ShellEnd { pane, exit_code } => {
            let pane = pane_or_env(pane)?;
            forward_event(&events::shell_end(&pane, exit_code))
        }
        Commands::Agent {
            pane,
            source,
            event,
        } => {
            let pane = pane_or_env(pane)?;
            let input = read_stdin()?;
            match events::agent(&pane, &source, event.as_deref(), &input)? {
                Some(envelope) => forward_event(&envelope),
                None => {
                    tracing::debug!(pane_id = %pane, source = %source, "Skipping hook (no event type)");
                    Ok(None)
                }
            }
        }
        Commands::Content {
            pane,
            job_name,
            title,
            command_line,
        } => {
            let pane = pane_or_env(pane)?;
            let text = read_stdin()?;
            let envelope = events::content(&pane, text, job_name, title, command_line);
            let outcome = daemon_client::send_content(&envelope)?;
            tracing::debug!(pane_id = %pane, outcome = %outcome, "Content submitted");
            Ok(None)
        }
        Commands::Focus { pane, clear } => {
            let pane = if clear { None } else { Some(pane_or_env(pane)?) };
            let outcome = daemon_client::set_focus(pane.as_deref())?;
            tracing::debug!(pane_id = ?pane, outcome = %outcome, "Focus reported");
            Ok(None)
        }
        Commands::Status { pane } => {
            let pane = pane_or_env(pane)?;
            let status = daemon_client::get_status(&pane)?;
            serde_json::to_string_pretty(&status)
                .map(Some)
                .map_err(|err| format!("Failed to format status: {}", err))
        }
    }
}

fn forward_event(envelope: &termsup_daemon_protocol::EventEnvelope) -> Result<Option<String>, String> {
    let outcome = daemon_client::send_event(envelope)?;
    tracing::debug!(
        pane_id = %envelope.pane_id,
        source = %envelope.source,
        event_type = %envelope.event_type,
        outcome = %outcome,
        "Daemon accepted event"
    );
    Ok(None)
}

fn pane_or_env(pane: Option<String>) -> Result<String, String> {
    events::resolve_pane(pane, |key| env::var(key).ok())
        .ok_or_else(|| "No pane id given and none found in the environment".to_string())
}

fn read_stdin() -> Result<String, String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|err| format!("Failed to read stdin: {}", err))?;
    Ok(input)
}
