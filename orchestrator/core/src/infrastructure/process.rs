// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Probing
//!
//! Liveness checks for the OS processes behind peer agents. The peer registry
//! only sees the [`ProcessProbe`] trait so sweeps can be tested without
//! spawning real processes.
//!
//! On Unix, liveness is `kill(pid, 0)`: success or `EPERM` means the process
//! exists, `ESRCH` means it is gone. A process counts as interactive when it
//! holds a controlling terminal (Linux: `tty_nr` in `/proc/<pid>/stat`).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("pid {0} is not a valid target")]
    InvalidPid(u32),

    #[error("process {0} does not exist")]
    NoSuchProcess(u32),

    #[error("not permitted to signal process {0}")]
    PermissionDenied(u32),

    #[error("failed to signal process {pid}: errno {errno}")]
    Signal { pid: u32, errno: i32 },

    #[error("process signalling is not supported on this platform")]
    Unsupported,
}

pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;

    /// Whether the process is attached to a terminal and so presumed to be
    /// doing interactive work.
    fn is_interactive(&self, pid: u32) -> bool;

    /// Ask the process to exit (SIGTERM).
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;
}

/// Converts a pid into something `kill(2)` will treat as a single process.
/// 0 and values past `i32::MAX` would address process groups.
#[cfg(unix)]
fn to_target(pid: u32) -> Result<libc::pid_t, ProcessError> {
    match libc::pid_t::try_from(pid) {
        Ok(target) if target > 0 => Ok(target),
        _ => Err(ProcessError::InvalidPid(pid)),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

impl OsProcessProbe {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(target) = to_target(pid) else {
            return false;
        };
        if unsafe { libc::kill(target, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // No portable probe; never reap what we cannot see.
        true
    }

    #[cfg(target_os = "linux")]
    fn is_interactive(&self, pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| parse_tty_nr(&stat))
            .map(|tty| tty != 0)
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_interactive(&self, _pid: u32) -> bool {
        false
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let target = to_target(pid)?;
        if unsafe { libc::kill(target, libc::SIGTERM) } == 0 {
            return Ok(());
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Err(ProcessError::NoSuchProcess(pid)),
            Some(libc::EPERM) => Err(ProcessError::PermissionDenied(pid)),
            errno => Err(ProcessError::Signal {
                pid,
                errno: errno.unwrap_or(-1),
            }),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, _pid: u32) -> Result<(), ProcessError> {
        Err(ProcessError::Unsupported)
    }
}

/// `tty_nr` (field 7) of a `/proc/<pid>/stat` line. The command name in
/// field 2 may contain spaces and parentheses, so fields are counted from the
/// last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_tty_nr(stat: &str) -> Option<i64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tty_nr() {
        let stat = "4242 (my (odd) cmd) S 1 4242 4242 34816 4242 4194560 100 0 0 0";
        assert_eq!(parse_tty_nr(stat), Some(34816));

        let daemon = "17 (courier) S 1 17 17 0 -1 4194624";
        assert_eq!(parse_tty_nr(daemon), Some(0));

        assert_eq!(parse_tty_nr("garbage"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_current_process_is_alive() {
        let probe = OsProcessProbe::new();
        assert!(probe.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_group_addressing_pids_are_rejected() {
        let probe = OsProcessProbe::new();
        assert!(!probe.is_alive(0));
        assert!(!probe.is_alive(u32::MAX));
        assert_eq!(probe.terminate(0), Err(ProcessError::InvalidPid(0)));
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let probe = OsProcessProbe::new();
        assert!(!probe.is_alive(pid));
        assert_eq!(probe.terminate(pid), Err(ProcessError::NoSuchProcess(pid)));
    }
}
