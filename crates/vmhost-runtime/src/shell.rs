use std::io::{self, Write};
use std::process::{Command, Output, Stdio};
use std::thread;

use tracing::debug;
use vmhost_core::config::HostConfig;
use vmhost_core::{Error, Result};

/// Render a command line for logs and error messages.
pub fn command_line(cmd: &str, args: &[&str]) -> String {
    if args.is_empty() {
        return cmd.to_string();
    }
    format!("{} {}", cmd, args.join(" "))
}

/// Run a command on the host, capturing output.
///
/// Commands inherit the calling thread's network namespace, so running this
/// inside [`crate::netns::Netns::run`] targets the switched namespace.
pub fn run_host(cmd: &str, args: &[&str]) -> Result<Output> {
    run_host_with_input(cmd, args, None)
}

/// Run a command on the host, writing `input` to its stdin.
pub fn run_host_with_input(cmd: &str, args: &[&str], input: Option<&[u8]>) -> Result<Output> {
    let line = command_line(cmd, args);
    debug!(command = %line, "running host command");

    #[cfg(test)]
    if let Some(output) = crate::shell_mock::intercept(&line, input) {
        return Ok(output);
    }

    let spawn_err = |source| Error::Spawn {
        command: line.clone(),
        source,
    };

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    // stdin is fed while output is collected; a tool may fill its stdout
    // or stderr pipe before it reads any input
    let stdin = child.stdin.take();
    let (output, written) = thread::scope(|s| {
        let writer = match (input, stdin) {
            (Some(data), Some(mut stdin)) => Some(s.spawn(move || stdin.write_all(data))),
            _ => None,
        };
        let output = child.wait_with_output();
        let written = writer.map_or(Ok(()), |w| w.join().unwrap_or(Ok(())));
        (output, written)
    });

    let output = output.map_err(spawn_err)?;
    match written {
        // the tool exited without reading all input; its status says why
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(spawn_err(e)),
        _ => Ok(output),
    }
}

/// Map a non-zero exit to [`Error::CommandFailed`]; return trimmed stdout.
pub fn check(line: &str, output: Output) -> Result<String> {
    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: line.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command on the host, failing on non-zero exit.
pub fn run_host_checked(cmd: &str, args: &[&str]) -> Result<String> {
    let output = run_host(cmd, args)?;
    check(&command_line(cmd, args), output)
}

/// Argument vector for a host tool, with `sudo` prepended when configured.
fn tool_invocation<'a>(config: &HostConfig, tool: &'a str, args: &[&'a str]) -> (&'a str, Vec<&'a str>) {
    if config.use_sudo {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(tool);
        argv.extend_from_slice(args);
        ("sudo", argv)
    } else {
        (tool, args.to_vec())
    }
}

/// Run a host tool (`ip`, `tc`, `losetup`, ...) capturing output.
pub fn run_tool(config: &HostConfig, tool: &str, args: &[&str]) -> Result<Output> {
    let (cmd, argv) = tool_invocation(config, tool, args);
    run_host(cmd, &argv)
}

/// Run a host tool with stdin input, failing on non-zero exit.
pub fn run_tool_with_input(
    config: &HostConfig,
    tool: &str,
    args: &[&str],
    input: &[u8],
) -> Result<String> {
    let (cmd, argv) = tool_invocation(config, tool, args);
    let output = run_host_with_input(cmd, &argv, Some(input))?;
    check(&command_line(cmd, &argv), output)
}

/// Run a host tool, failing on non-zero exit.
pub fn run_tool_checked(config: &HostConfig, tool: &str, args: &[&str]) -> Result<String> {
    let (cmd, argv) = tool_invocation(config, tool, args);
    let output = run_host(cmd, &argv)?;
    check(&command_line(cmd, &argv), output)
}
