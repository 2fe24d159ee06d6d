//! OS service registration for beacon-gateway.
//!
//! Registers the binary with the native service manager (systemd, launchd,
//! the Windows SCM) so the gateway keeps running in the background and is
//! restarted if it exits with an error.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use service_manager::{
    RestartPolicy, ServiceInstallCtx, ServiceLabel, ServiceLevel, ServiceManager, ServiceStartCtx,
    ServiceStopCtx, ServiceUninstallCtx,
};
use thiserror::Error;

/// Service label for the gateway
const SERVICE_LABEL: &str = "net.sysnet.beacon-gateway";

/// Errors that can occur during service management.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No service manager available on this platform")]
    NoServiceManager,

    #[error("Service manager error: {0}")]
    Manager(String),

    #[error("Could not find beacon-gateway executable")]
    ExecutableNotFound,

    #[error("User-level services not supported on this platform")]
    UserLevelNotSupported,

    #[error("Invalid service label: {0}")]
    Label(String),
}

/// Service management level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Level {
    /// System-level service (requires root/admin)
    #[default]
    System,
    /// User-level service (no elevated privileges needed)
    User,
}

impl Level {
    pub fn from_user_flag(user: bool) -> Self {
        if user { Level::User } else { Level::System }
    }
}

fn get_manager(level: Level) -> Result<Box<dyn ServiceManager>, ServiceError> {
    let mut manager = <dyn ServiceManager>::native().map_err(|_| ServiceError::NoServiceManager)?;

    let service_level = match level {
        Level::System => ServiceLevel::System,
        Level::User => ServiceLevel::User,
    };

    manager
        .set_level(service_level)
        .map_err(|_| ServiceError::UserLevelNotSupported)?;

    Ok(manager)
}

fn get_label() -> Result<ServiceLabel, ServiceError> {
    SERVICE_LABEL
        .parse::<ServiceLabel>()
        .map_err(|e| ServiceError::Label(e.to_string()))
}

/// Arguments the installed unit runs with.
///
/// Explicit config paths are forwarded so the background process reads the
/// same files the installing user pointed at.
fn run_args(config: Option<&Path>, preferences: Option<&Path>) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = config {
        args.push(OsString::from("--config"));
        args.push(path.as_os_str().to_owned());
    }
    if let Some(path) = preferences {
        args.push(OsString::from("--preferences"));
        args.push(path.as_os_str().to_owned());
    }
    args.push(OsString::from("run"));
    args
}

/// Install beacon-gateway as a service.
pub fn install(
    level: Level,
    config: Option<&Path>,
    preferences: Option<&Path>,
) -> Result<(), ServiceError> {
    let manager = get_manager(level)?;
    let program: PathBuf = env::current_exe().map_err(|_| ServiceError::ExecutableNotFound)?;

    manager
        .install(ServiceInstallCtx {
            label: get_label()?,
            program,
            args: run_args(config, preferences),
            contents: None,
            username: None,
            working_directory: None,
            environment: None,
            autostart: true,
            restart_policy: RestartPolicy::OnFailure {
                delay_secs: Some(5),
            },
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Uninstall the beacon-gateway service.
pub fn uninstall(level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .uninstall(ServiceUninstallCtx {
            label: get_label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Start the beacon-gateway service.
pub fn start(level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .start(ServiceStartCtx {
            label: get_label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Stop the beacon-gateway service.
pub fn stop(level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .stop(ServiceStopCtx {
            label: get_label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}
