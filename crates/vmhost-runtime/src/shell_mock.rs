//! Test mock for `shell::run_host` and related functions.
//!
//! Installs a thread-local handler that intercepts host commands during
//! tests, answers them from scripted rules, and records every invocation.

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

/// Mock response for a host command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub(crate) fn to_output(&self) -> Output {
        Output {
            // Unix exit code encoding: status = code << 8
            status: ExitStatus::from_raw(self.exit_code << 8),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: self.stderr.as_bytes().to_vec(),
        }
    }
}

/// One intercepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub input: Option<String>,
}

/// Shared record of intercepted commands, in call order.
pub type CommandLog = Arc<Mutex<Vec<Invocation>>>;

type MockHandler = Box<dyn Fn(&str) -> MockResponse>;

struct Installed {
    handler: MockHandler,
    log: CommandLog,
}

thread_local! {
    static HANDLER: RefCell<Option<Installed>> = const { RefCell::new(None) };
}

/// Guard that clears the mock handler on drop.
pub struct MockGuard;

impl Drop for MockGuard {
    fn drop(&mut self) {
        HANDLER.with(|h| *h.borrow_mut() = None);
    }
}

/// Try to intercept a host command via the installed mock handler.
pub(crate) fn intercept(command: &str, input: Option<&[u8]>) -> Option<Output> {
    HANDLER.with(|h| {
        h.borrow().as_ref().map(|installed| {
            installed.log.lock().unwrap().push(Invocation {
                command: command.to_string(),
                input: input.map(|i| String::from_utf8_lossy(i).into_owned()),
            });
            (installed.handler)(command).to_output()
        })
    })
}

/// Command lines recorded so far.
pub fn commands(log: &CommandLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .map(|i| i.command.clone())
        .collect()
}

/// Build a mock that answers commands by substring rules.
pub fn mock_shell() -> MockShellBuilder {
    MockShellBuilder {
        rules: Vec::new(),
        fallback: MockResponse::empty(),
    }
}

pub struct MockShellBuilder {
    rules: Vec<(String, MockResponse)>,
    fallback: MockResponse,
}

impl MockShellBuilder {
    /// Answer any command containing `pattern`. Earlier rules win.
    pub fn on(mut self, pattern: &str, response: MockResponse) -> Self {
        self.rules.push((pattern.to_string(), response));
        self
    }

    /// Response for commands no rule matches (default: exit 0, no output).
    pub fn otherwise(mut self, response: MockResponse) -> Self {
        self.fallback = response;
        self
    }

    /// Install the mock. Returns a guard (clears on drop) and the call log.
    pub fn install(self) -> (MockGuard, CommandLog) {
        let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let MockShellBuilder { rules, fallback } = self;

        let handler: MockHandler = Box::new(move |command: &str| {
            rules
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| fallback.clone())
        });

        HANDLER.with(|h| {
            *h.borrow_mut() = Some(Installed {
                handler,
                log: log.clone(),
            });
        });

        (MockGuard, log)
    }
}

/// Rules for a host where loop attach, sizing, and dmsetup all succeed.
///
/// The base image attaches as `/dev/loop7` (`base_sectors` long) and the
/// overlay as `/dev/loop8` (`overlay_sectors` long).
pub fn healthy_block_host(base_sectors: u64, overlay_sectors: u64) -> MockShellBuilder {
    mock_shell()
        .on("--read-only", MockResponse::ok("/dev/loop7\n"))
        .on("losetup --find", MockResponse::ok("/dev/loop8\n"))
        .on(
            "--getsz /dev/loop7",
            MockResponse::ok(&format!("{}\n", base_sectors)),
        )
        .on(
            "--getsz /dev/loop8",
            MockResponse::ok(&format!("{}\n", overlay_sectors)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let (_guard, log) = mock_shell()
            .on("link show", MockResponse::ok("2: eth0: <UP>"))
            .on("link", MockResponse::fail(1, "nope"))
            .install();

        let out = intercept("ip link show dev eth0", None).unwrap();
        assert!(out.status.success());
        let out = intercept("ip link del tap0", None).unwrap();
        assert_eq!(out.status.code(), Some(1));
        assert_eq!(commands(&log).len(), 2);
    }

    #[test]
    fn test_guard_uninstalls() {
        {
            let (_guard, _log) = mock_shell().install();
            assert!(intercept("true", None).is_some());
        }
        assert!(intercept("true", None).is_none());
    }
}
