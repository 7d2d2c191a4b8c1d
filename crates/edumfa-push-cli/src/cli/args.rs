use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "edumfa-push",
    version,
    about = "Headless eduMFA push authenticator: enroll tokens, poll and answer login challenges"
)]
pub struct Cli {
    /// Directory holding tokens, push requests and device keys
    #[arg(long, global = true, env = "EDUMFA_PUSH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Push delivery handle sent to the server during enrollment
    #[arg(long, global = true, env = "EDUMFA_PUSH_HANDLE", default_value = "edumfa-push-cli")]
    pub push_handle: String,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enroll a token from an `edumfa://` descriptor
    Enroll(EnrollArgs),
    /// List enrolled tokens
    Tokens,
    /// Retry a failed or interrupted rollout
    Retry(SerialArgs),
    /// Resume every unfinished rollout
    Resume,
    /// Delete a token and its device key
    Delete(SerialArgs),
    /// Poll all tokens for pending challenges
    Poll(PollArgs),
    /// List push requests
    Requests(RequestsArgs),
    /// Approve a push request
    Accept(RequestArgs),
    /// Deny a push request
    Decline(RequestArgs),
    /// Print version
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct EnrollArgs {
    /// Enrollment descriptor (QR code content)
    pub uri: String,
}

#[derive(Args, Debug, Clone)]
pub struct SerialArgs {
    pub serial: String,
}

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Keep polling every N seconds
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct RequestsArgs {
    /// Include answered and expired requests
    #[arg(long)]
    pub all: bool,

    /// Remove every stored request
    #[arg(long, conflicts_with = "all")]
    pub clear: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Request id, or its nonce
    pub id: String,
}
