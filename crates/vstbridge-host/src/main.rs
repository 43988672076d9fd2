//! Host binary. Spawned by a controller to run one plugin out of process.

use clap::Parser;
use std::ffi::OsString;
use std::process::ExitCode;
use vstbridge_host::{default_loader, BridgeConfig, HeadlessWindows, Session};

#[derive(Parser, Debug)]
#[command(name = "vstbridge-host", version, about = "Out-of-process VST3 host")]
struct Args {
    /// Session id appended to every endpoint name (defaults to this process id)
    #[arg(long, value_name = "ID")]
    uid: Option<String>,

    /// Base name of the command pipe
    #[arg(long, value_name = "NAME")]
    pipe: Option<String>,

    /// Base name of the shared audio region
    #[arg(long, value_name = "NAME")]
    shm: Option<String>,

    /// Base name of the client-ready signal
    #[arg(long = "event-ready", value_name = "NAME")]
    event_ready: Option<String>,

    /// Base name of the host-done signal
    #[arg(long = "event-done", value_name = "NAME")]
    event_done: Option<String>,
}

/// Rewrite the single-dash spellings older controllers pass.
fn normalize_legacy_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let replacement = match arg.to_str() {
                Some("-uid") => "--uid",
                Some("-pipe") => "--pipe",
                Some("-shm") => "--shm",
                Some("-event_ready") => "--event-ready",
                Some("-event_done") => "--event-done",
                Some("-v") => "--version",
                _ => return arg,
            };
            OsString::from(replacement)
        })
        .collect()
}

fn build_config(args: Args) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    if let Some(uid) = args.uid {
        match uid.trim().parse::<u64>() {
            Ok(id) => config.session_id = id,
            Err(e) => tracing::warn!(
                "invalid --uid {:?} ({}); using {}",
                uid,
                e,
                config.session_id
            ),
        }
    }
    if let Some(pipe) = args.pipe {
        config.pipe_base = pipe;
    }
    if let Some(shm) = args.shm {
        config.shm_base = shm;
    }
    if let Some(ready) = args.event_ready {
        config.event_ready_base = ready;
    }
    if let Some(done) = args.event_done {
        config.event_done_base = done;
    }
    config
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse_from(normalize_legacy_flags(std::env::args_os()));
    let config = build_config(args);

    let session = match Session::start(config, default_loader(), Box::new(HeadlessWindows)) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("failed to start host: {}", e);
            return ExitCode::FAILURE;
        }
    };
    session.run();
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(normalize_legacy_flags(args.iter().map(OsString::from)))
    }

    #[test]
    fn test_legacy_flags_are_normalized() {
        let args = parse(&[
            "vstbridge-host",
            "-uid",
            "42",
            "-pipe",
            "MyPipe",
            "-event_ready",
            "Ready",
            "-event_done",
            "Done",
        ]);
        let config = build_config(args);
        assert_eq!(config.session_id, 42);
        assert_eq!(config.pipe_base, "MyPipe");
        assert_eq!(config.event_ready_base, "Ready");
        assert_eq!(config.event_done_base, "Done");
        assert!(config.pipe_name().ends_with("MyPipe_42"));
    }

    #[test]
    fn test_unparsable_uid_keeps_default() {
        let config = build_config(parse(&["vstbridge-host", "--uid", "abc", "--shm", "Audio"]));
        assert_eq!(config.session_id, BridgeConfig::default().session_id);
        assert_eq!(config.shm_base, "Audio");
    }

    #[test]
    fn test_short_version_flag_is_mapped() {
        let args = normalize_legacy_flags(["vstbridge-host", "-v"].map(OsString::from));
        assert_eq!(args[1], OsString::from("--version"));
    }
}
