use crate::error::TemplateError;
use log::debug;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Run `command` through the platform shell and return its captured stdout.
///
/// The command is not sandboxed in any way. Its stdin is closed, stderr is captured
/// for the error message, and a non-zero exit (or death by signal) becomes
/// [`TemplateError::Process`].
pub fn run_shell(command: &str, working_dir: Option<&Path>) -> Result<String, TemplateError> {
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().map_err(|e| TemplateError::Process {
        command: command.to_string(),
        status: "spawn failure".to_string(),
        stderr: e.to_string(),
    })?;

    let code = exit_code(output.status);
    debug!("shell `{}` exited with {}", command, code);
    if !output.status.success() {
        return Err(TemplateError::Process {
            command: command.to_string(),
            status: format!("exit code {code}"),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn exit_code(exit_status: ExitStatus) -> i32 {
    match exit_status.code() {
        Some(x) => x,
        None => terminated_by_signal(exit_status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}
