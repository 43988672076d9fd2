//! Command-line protocol spoken over the transport.
//!
//! One command per line, one response line per command. `exit` and `get_state`
//! are matched exactly (after trimming trailing whitespace); every other line is
//! acknowledged immediately and parsed later by the main loop with
//! [`AsyncCommand::parse`].

use crate::error::{BridgeError, Result};
use std::fmt;
use std::path::PathBuf;

/// Largest frame count a single audio cycle may carry.
pub const MAX_BLOCK_SIZE: usize = 2048;

/// Upper bound on one command line, newline included.
pub const MAX_COMMAND_LEN: usize = 66000;

pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
pub const DEFAULT_BLOCK_SIZE: i32 = 1024;

pub const EXIT_ACK: &str = "OK: Exit requested.";

/// How the listener treats an incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandClass {
    /// Handled by the listener itself.
    Exit,
    /// Caller blocks until the main loop produces a result.
    Sync(SyncCommand),
    /// Queued for the main loop; acknowledged immediately.
    Async(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    GetState,
}

/// Classify a raw line read from the transport.
pub fn classify(line: &str) -> CommandClass {
    let line = line.trim_end();
    match line {
        "exit" => CommandClass::Exit,
        "get_state" => CommandClass::Sync(SyncCommand::GetState),
        other => CommandClass::Async(other.to_string()),
    }
}

/// Arguments shared by `load_plugin` and `load_and_set_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub path: PathBuf,
    pub sample_rate: f64,
    pub block_size: i32,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: i32) -> Self {
        self.block_size = block_size;
        self
    }
}

/// A queued command, parsed on the main loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncCommand {
    LoadPlugin(LoadRequest),
    LoadAndSetState {
        request: LoadRequest,
        state: Option<String>,
    },
    /// Deprecated; restores into the currently loaded instance.
    SetState(String),
    ShowGui,
    HideGui,
    /// Accepted and ignored.
    Unknown(String),
}

impl AsyncCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let split = line
            .find(|c: char| c.is_whitespace() || c == '"')
            .unwrap_or(line.len());
        let (verb, rest) = line.split_at(split);

        match verb {
            "load_plugin" => {
                let (path, mut tail) = parse_quoted_path(verb, rest)?;
                let request = parse_load_args(path, &mut tail);
                Ok(AsyncCommand::LoadPlugin(request))
            }
            "load_and_set_state" => {
                let (path, mut tail) = parse_quoted_path(verb, rest)?;
                let request = parse_load_args(path, &mut tail);
                let state = tail.next().map(str::to_string);
                Ok(AsyncCommand::LoadAndSetState { request, state })
            }
            "set_state" => {
                let payload = rest.trim();
                if payload.is_empty() {
                    return Err(BridgeError::MalformedCommand(
                        "set_state requires a payload".to_string(),
                    ));
                }
                Ok(AsyncCommand::SetState(payload.to_string()))
            }
            "show_gui" => Ok(AsyncCommand::ShowGui),
            "hide_gui" => Ok(AsyncCommand::HideGui),
            _ => Ok(AsyncCommand::Unknown(verb.to_string())),
        }
    }
}

fn parse_quoted_path<'a>(
    verb: &str,
    rest: &'a str,
) -> Result<(PathBuf, std::str::SplitWhitespace<'a>)> {
    let rest = rest.trim_start();
    let Some(quoted) = rest.strip_prefix('"') else {
        return Err(BridgeError::MalformedCommand(format!(
            "{verb}: path must be double-quoted"
        )));
    };
    let Some(end) = quoted.find('"') else {
        return Err(BridgeError::MalformedCommand(format!(
            "{verb}: missing closing quote"
        )));
    };
    let path = &quoted[..end];
    if path.is_empty() {
        return Err(BridgeError::MalformedCommand(format!("{verb}: empty path")));
    }
    Ok((PathBuf::from(path), quoted[end + 1..].split_whitespace()))
}

/// Reads `[sampleRate] [blockSize]` in order; stops at the first token that
/// does not parse, leaving the remaining values at their defaults.
fn parse_load_args(path: PathBuf, tokens: &mut std::str::SplitWhitespace<'_>) -> LoadRequest {
    let mut request = LoadRequest::new(path);

    let Some(sample_rate) = tokens.next().and_then(|t| t.parse::<f64>().ok()) else {
        return request;
    };
    request.sample_rate = sample_rate;

    if let Some(block_size) = tokens.next().and_then(|t| t.parse::<i32>().ok()) {
        request.block_size = block_size;
    }
    request
}

impl fmt::Display for AsyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncCommand::LoadPlugin(r) => write!(
                f,
                "load_plugin \"{}\" {} {}",
                r.path.display(),
                r.sample_rate,
                r.block_size
            ),
            AsyncCommand::LoadAndSetState { request: r, state } => {
                write!(
                    f,
                    "load_and_set_state \"{}\" {} {}",
                    r.path.display(),
                    r.sample_rate,
                    r.block_size
                )?;
                if let Some(state) = state {
                    write!(f, " {state}")?;
                }
                Ok(())
            }
            AsyncCommand::SetState(payload) => write!(f, "set_state {payload}"),
            AsyncCommand::ShowGui => write!(f, "show_gui"),
            AsyncCommand::HideGui => write!(f, "hide_gui"),
            AsyncCommand::Unknown(verb) => write!(f, "{verb}"),
        }
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ExitAck,
    Ok(Option<String>),
    Fail(String),
}

impl Response {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        if line == EXIT_ACK {
            return Ok(Response::ExitAck);
        }
        if line == "OK" {
            return Ok(Response::Ok(None));
        }
        if let Some(payload) = line.strip_prefix("OK ") {
            return Ok(Response::Ok(Some(payload.to_string())));
        }
        if let Some(reason) = line.strip_prefix("FAIL ") {
            return Ok(Response::Fail(reason.to_string()));
        }
        Err(BridgeError::ProtocolError(format!(
            "unrecognized response: {line}"
        )))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::ExitAck => f.write_str(EXIT_ACK),
            Response::Ok(None) => f.write_str("OK"),
            Response::Ok(Some(payload)) => write!(f, "OK {payload}"),
            Response::Fail(reason) => write!(f, "FAIL {reason}"),
        }
    }
}
