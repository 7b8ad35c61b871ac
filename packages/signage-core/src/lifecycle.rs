//! Application lifecycle abstraction.
//!
//! This module provides a [`Lifecycle`] trait for controlling process
//! lifecycle operations like restart and shutdown. The `REBOOT` remote
//! command (§4.10) and the pairing-expiry path both go through this trait
//! rather than calling `std::process::exit` directly.

/// Trait for application lifecycle operations.
///
/// Services that need to trigger process-level actions (restarting after
/// a `REBOOT` command, shutting down on `player_flow::stop`) use this
/// trait rather than directly calling platform-specific APIs.
///
/// # Example
///
/// ```ignore
/// struct CommandProcessor {
///     lifecycle: Arc<dyn Lifecycle>,
/// }
///
/// impl CommandProcessor {
///     fn handle_reboot(&self) {
///         self.lifecycle.request_restart();
///     }
/// }
/// ```
pub trait Lifecycle: Send + Sync {
    /// Requests a process restart.
    ///
    /// The implementation determines how the restart is performed. The
    /// standalone agent has no in-process restart mechanism; it logs and
    /// exits with a restart-requesting status code for an external
    /// supervisor (systemd, a container orchestrator) to relaunch it.
    fn request_restart(&self);

    /// Requests a graceful shutdown.
    ///
    /// The application should clean up resources and exit cleanly.
    fn request_shutdown(&self);
}

/// Exit code used by [`ServerLifecycle::request_restart`] to signal an
/// external supervisor that the process wants to be relaunched.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Headless-agent lifecycle implementation.
///
/// Restart is not directly supported in-process (there is no child process
/// to relaunch into); the agent instead exits with [`RESTART_EXIT_CODE`]
/// and expects an external supervisor to handle the restart. Shutdown
/// triggers a clean process exit.
pub struct ServerLifecycle;

impl Lifecycle for ServerLifecycle {
    fn request_restart(&self) {
        log::info!("restart requested - exiting for supervisor restart");
        std::process::exit(RESTART_EXIT_CODE);
    }

    fn request_shutdown(&self) {
        log::info!("shutdown requested");
        std::process::exit(0);
    }
}

/// No-op lifecycle for testing or embedded use.
///
/// Does nothing on restart/shutdown requests. Useful in tests or when
/// embedding the core library in a host that manages its own lifecycle.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_restart(&self) {
        log::debug!("restart requested (no-op)");
    }

    fn request_shutdown(&self) {
        log::debug!("shutdown requested (no-op)");
    }
}
