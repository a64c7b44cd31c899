use crate::managers::scheduler::SchedulerManager;
use crate::storage::ErrorLogEntry;

/// Fresh reachability probe. A restore kicks off a missed-meeting pass.
pub async fn check_network_status(scheduler: &SchedulerManager) -> Result<bool, String> {
    scheduler
        .check_network()
        .await
        .map(|check| check.reachable)
        .map_err(|e| format!("Failed to check network: {}", e))
}

pub async fn get_error_logs(scheduler: &SchedulerManager) -> Result<Vec<ErrorLogEntry>, String> {
    scheduler
        .error_logs()
        .await
        .map_err(|e| format!("Failed to read error logs: {}", e))
}

pub async fn clear_error_logs(scheduler: &SchedulerManager) -> Result<(), String> {
    scheduler
        .clear_error_logs()
        .await
        .map_err(|e| format!("Failed to clear error logs: {}", e))
}

pub async fn log_error(
    message: &str,
    platform: Option<&str>,
    url: Option<&str>,
    scheduler: &SchedulerManager,
) {
    scheduler.log_error(message, platform, url).await
}
