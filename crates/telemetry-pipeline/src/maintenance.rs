use crate::{CommandError, MaintenanceAction};
use async_trait::async_trait;

/// Process restart, file storage and firmware replacement live outside the pipeline.
#[async_trait(?Send)]
pub trait Maintenance {
    async fn perform(&self, action: MaintenanceAction) -> Result<(), CommandError>;
}

/// Records requests in the log without acting on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMaintenance;

#[async_trait(?Send)]
impl Maintenance for LoggingMaintenance {
    async fn perform(&self, action: MaintenanceAction) -> Result<(), CommandError> {
        tracing::info!(?action, "maintenance request ignored: no handler on this host");
        Ok(())
    }
}
