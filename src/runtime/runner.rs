use crate::master::controller::{ControlHandle, MasterController};
use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;

/// Drives a [`MasterController`] on a background task and maps OS signals to
/// the external stop action.
pub struct Runner {
    control: ControlHandle,
    task: JoinHandle<Result<()>>,
}

impl Runner {
    /// Spawns the controller's run loop immediately.
    pub fn spawn(controller: MasterController, control: ControlHandle) -> Self {
        let task = tokio::spawn(controller.run());
        Self { control, task }
    }

    /// Handle for external `start`/`stop` actions (preview release, shutdown).
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Waits for the master to finish on its own.
    pub async fn join(self) -> Result<()> {
        self.task.await.context("master task panicked")?
    }

    /// Runs until Ctrl-C (SIGINT), then requests a graceful stop and waits
    /// for the drain to complete.
    pub async fn run_until_ctrl_c(mut self) -> Result<()> {
        tokio::select! {
            result = &mut self.task => {
                return result.context("master task panicked")?;
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; requesting master stop");
                if let Err(err) = self.control.stop().await {
                    tracing::warn!(error = %err, "stop request failed; master may already be down");
                }
            }
        }

        self.task.await.context("master task panicked")?
    }
}
