//! sesskey-engine: offline proposal check.
//!
//! Usage: `sesskey-engine <config.yaml> <spec.json> <proposal.json>`
//!
//! Validates the proposal against the spec with no prior usage at the
//! current time and prints the outcome as JSON. Exit status: 0 authorized,
//! 1 rejected, 2 error.

use std::fs;
use std::process::ExitCode;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, EnvFilter};

use sesskey_core::error::{Result, SessionError};
use sesskey_core::{SessionSpec, TransactionProposal};
use sesskey_engine::{check, config, Clock, SystemClock};

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(code = %e.code(), error = %e, "check failed");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [cfg_path, spec_path, proposal_path] = args.as_slice() else {
        return Err(SessionError::Config(
            "usage: sesskey-engine <config.yaml> <spec.json> <proposal.json>".into(),
        ));
    };

    let cfg = config::load_from_file(cfg_path)?;
    let spec: SessionSpec = read_json(spec_path)?;
    let proposal: TransactionProposal = read_json(proposal_path)?;

    let now = SystemClock.now();
    let report = check::check(&cfg, &spec, &proposal, now)?;
    let out = serde_json::to_string_pretty(&report)
        .map_err(|e| SessionError::Internal(format!("encode report failed: {e}")))?;
    println!("{out}");
    Ok(report.is_authorized())
}

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let s = fs::read_to_string(path).map_err(|e| SessionError::Config(format!("read {path} failed: {e}")))?;
    serde_json::from_str(&s).map_err(|e| SessionError::Codec(format!("{path}: {e}")))
}
