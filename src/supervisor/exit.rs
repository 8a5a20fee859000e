use serde::Serialize;

/// How the daemon process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Error,
    /// Exited after finding no upgrade to apply.
    NoUpgradeAvailable,
    /// Asked to restart itself.
    Restarting,
    /// Restarting into an upgraded binary.
    Upgrading,
    Other(i32),
    /// Terminated by a signal the supervisor did not send.
    Signalled(i32),
    /// Terminated by the supervisor.
    Killed,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            1 => ExitStatus::Error,
            2 => ExitStatus::NoUpgradeAvailable,
            3 => ExitStatus::Restarting,
            4 => ExitStatus::Upgrading,
            other => ExitStatus::Other(other),
        }
    }

    pub fn from_std(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::from_code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signalled(signal);
            }
        }
        ExitStatus::Other(-1)
    }

    /// The daemon expects to be launched again right away.
    pub fn is_restart(self) -> bool {
        matches!(self, ExitStatus::Restarting | ExitStatus::Upgrading)
    }

    /// An exit nobody asked for that should be surfaced to the user.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExitStatus::Error | ExitStatus::Other(_) | ExitStatus::Signalled(_)
        )
    }
}
