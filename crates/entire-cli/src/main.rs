//! `entire`: capture AI-agent session history alongside git history.
//!
//! Two hook families feed the engine: agent hooks (`entire hook <name>`)
//! receive JSON on stdin from the agent, git hooks (`entire git <name>`)
//! receive git's own hook arguments. Hook failures must never block the
//! user, so both families log internal errors and exit 0; only the
//! porcelain commands (`sessions`, `rewind`, …) exit 1 on error.

mod cmd_cleanup;
mod cmd_rewind;
mod cmd_sessions;
mod cmd_status;
mod hook_input;
mod settings;
mod strategy;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use entire_session::AgentKind;
use hook_input::HookInput;
use strategy::{HookResult, ManualCommit};

#[derive(Parser)]
#[command(name = "entire", version, about = "Session history for AI coding agents")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Agent hook entrypoints (read JSON from stdin)
    Hook {
        #[command(subcommand)]
        cmd: HookCmd,
        /// Which agent integration is calling
        #[arg(long, global = true, default_value = "claude-code")]
        agent: String,
    },
    /// Git hook entrypoints (invoked from .git/hooks)
    Git {
        #[command(subcommand)]
        cmd: GitHookCmd,
    },
    /// List sessions
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List or restore checkpoints
    Rewind {
        #[command(subcommand)]
        cmd: RewindCmd,
    },
    /// Show engine state for this repository
    Status,
    /// Remove session state and shadow refs
    Cleanup {
        /// Session id to remove
        session_id: Option<String>,
        /// Remove all sessions
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum HookCmd {
    /// Agent session begins
    SessionStart,
    /// User posted a prompt
    UserPromptSubmit,
    /// A tool call finished (task checkpoints for sub-agents)
    PostToolUse,
    /// Agent turn ended
    Stop,
    /// Agent session ended
    SessionEnd,
}

#[derive(Subcommand)]
enum GitHookCmd {
    /// prepare-commit-msg <file> [source] [sha]
    PrepareCommitMsg {
        msg_file: PathBuf,
        source: Option<String>,
        #[allow(unused)]
        sha: Option<String>,
    },
    /// commit-msg <file>
    CommitMsg { msg_file: PathBuf },
    /// post-commit
    PostCommit,
    /// pre-push <remote> <url>
    PrePush {
        remote: String,
        #[allow(unused)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum RewindCmd {
    /// Show available rewind points for the current HEAD
    List,
    /// Restore the working tree (or transcript) at a checkpoint
    To {
        /// Checkpoint commit id (prefix accepted)
        target: String,
        /// Apply without showing the preview first
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Hook { cmd, agent } => run_agent_hook(cmd, AgentKind::from_slug(&agent)),
        Command::Git { cmd } => run_git_hook(cmd),
        Command::Sessions { json } => user_command(cmd_sessions::run(json)),
        Command::Rewind { cmd } => match cmd {
            RewindCmd::List => user_command(cmd_rewind::list()),
            RewindCmd::To { target, yes } => user_command(cmd_rewind::to(&target, yes)),
        },
        Command::Status => user_command(cmd_status::run()),
        Command::Cleanup { session_id, all } => {
            user_command(cmd_cleanup::run(session_id.as_deref(), all))
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("ENTIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Agent hooks never block the agent: internal failures are logged and
/// the hook exits 0. Warnings go to stderr.
fn run_agent_hook(cmd: HookCmd, agent: AgentKind) -> ExitCode {
    let mut stdin = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut stdin) {
        tracing::warn!(error = %e, "failed to read hook stdin");
        return ExitCode::SUCCESS;
    }
    let input = match HookInput::parse(&stdin) {
        Ok(input) => input,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse hook stdin");
            return ExitCode::SUCCESS;
        }
    };

    let engine = match ManualCommit::open() {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(error = %e, "hook outside a usable repository");
            return ExitCode::SUCCESS;
        }
    };

    let result = match cmd {
        HookCmd::SessionStart => engine.session_start(&input, agent),
        HookCmd::UserPromptSubmit => engine.user_prompt_submit(&input, agent),
        HookCmd::PostToolUse => engine.post_tool_use(&input),
        HookCmd::Stop => engine.stop(&input),
        HookCmd::SessionEnd => engine.session_stop(&input),
    };
    emit(result)
}

/// Git hooks must not block the user's commit or push either; any error
/// degrades to a warning.
fn run_git_hook(cmd: GitHookCmd) -> ExitCode {
    let engine = match ManualCommit::open() {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(error = %e, "git hook outside a usable repository");
            return ExitCode::SUCCESS;
        }
    };
    let outcome = match cmd {
        GitHookCmd::PrepareCommitMsg {
            msg_file, source, ..
        } => engine.prepare_commit_msg(&msg_file, source.as_deref()),
        GitHookCmd::CommitMsg { msg_file } => engine.commit_msg(&msg_file),
        GitHookCmd::PostCommit => engine.post_commit(),
        GitHookCmd::PrePush { remote, .. } => engine.pre_push(&remote),
    };
    if let Err(e) = outcome {
        tracing::warn!(error = %e, "git hook failed internally");
    }
    ExitCode::SUCCESS
}

fn emit(result: HookResult) -> ExitCode {
    if let Some(stdout) = result.stdout {
        println!("{stdout}");
    }
    if let Some(stderr) = result.stderr {
        eprintln!("{stderr}");
    }
    ExitCode::SUCCESS
}

fn user_command(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("entire: {e:#}");
            ExitCode::FAILURE
        }
    }
}
