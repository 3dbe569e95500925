use std::io::ErrorKind;
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::storage::Backend;

const MAX_SUMMARY_CHARS: usize = 2048;

/// Run a backend CLI command and capture its output.
///
/// A binary that cannot be spawned means the backend is unusable from this
/// host, which is reported as `BackendUnavailable` rather than a plain I/O
/// failure.
pub fn output_for(backend: Backend, cmd: &mut Command) -> Result<Output> {
    match cmd.output() {
        Ok(out) => Ok(out),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::BackendUnavailable {
            backend,
            reason: format!(
                "'{}' was not found on PATH",
                cmd.get_program().to_string_lossy()
            ),
        }),
        Err(e) => Err(Error::msg(format!("failed to run command {:?}: {e}", cmd))),
    }
}

pub fn run_status(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .status()
        .map_err(|e| Error::msg(format!("failed to spawn {:?}: {e}", cmd.get_program())))?;
    if !status.success() {
        return Err(Error::msg(format!(
            "{} exited with {status}",
            cmd.get_program().to_string_lossy()
        )));
    }
    Ok(())
}

/// Prefer stderr, then stdout, then the exit status.
pub fn command_summary(out: &Output) -> String {
    let stderr = sanitize(&String::from_utf8_lossy(&out.stderr));
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = sanitize(&String::from_utf8_lossy(&out.stdout));
    if !stdout.is_empty() {
        return stdout;
    }
    format!("status {}", out.status)
}

// CLI output is logged and embedded in error messages; strip terminal escapes
// and collapse it onto one line.
fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_SUMMARY_CHARS));
    let mut chars = input.trim().chars().peekable();
    let mut count = 0usize;
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for n in chars.by_ref() {
                    if ('@'..='~').contains(&n) {
                        break;
                    }
                }
            }
            continue;
        }
        if c == '\n' || c == '\t' {
            if !out.ends_with(' ') {
                out.push(' ');
                count += 1;
            }
        } else if c.is_control() {
            continue;
        } else {
            out.push(c);
            count += 1;
        }
        if count >= MAX_SUMMARY_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out.trim().to_string()
}
