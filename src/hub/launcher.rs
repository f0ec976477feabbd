//! Companion hub start-up
//!
//! When the hub is unreachable the client asks a [`HubLauncher`] to start
//! one, waits, and retries once.

use crate::error::{Result, TraceFlowError};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub trait HubLauncher: Send + Sync {
    fn launch(&self) -> Result<()>;
}

/// Spawns a configured command detached from our stdio
///
/// A reaper thread waits on each child so an exited hub does not linger as a
/// zombie.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    running: Arc<AtomicUsize>,
}

impl CommandLauncher {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hubs started by this launcher that have not exited yet
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// `["program", "arg", ...]`; None when empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program, args))
    }
}

impl HubLauncher for CommandLauncher {
    fn launch(&self) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TraceFlowError::Hub(format!("failed to start hub `{}`: {e}", self.program)))?;
        let pid = child.id();
        info!(program = %self.program, pid, "started companion hub");

        self.running.fetch_add(1, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let reaper = thread::Builder::new()
            .name(format!("trueflow-hub-reaper-{pid}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => debug!(pid, %status, "companion hub exited"),
                    Err(e) => warn!(pid, error = %e, "failed to wait on companion hub"),
                }
                running.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(e) = reaper {
            // The child stays unreaped until we exit
            self.running.fetch_sub(1, Ordering::SeqCst);
            warn!(pid, error = %e, "could not start companion hub reaper");
        }
        Ok(())
    }
}

/// Launcher for setups where the hub is managed elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLauncher;

impl HubLauncher for NoLauncher {
    fn launch(&self) -> Result<()> {
        Err(TraceFlowError::Hub("no companion hub command configured".to_string()))
    }
}
