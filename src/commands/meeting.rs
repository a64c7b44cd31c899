use crate::managers::scheduler::SchedulerManager;
use crate::meeting::{CancelDetails, JoinStatusReport, Meeting, NumberInput, ScheduleDetails};

pub async fn schedule_meeting(
    details: &ScheduleDetails,
    scheduler: &SchedulerManager,
) -> Result<Meeting, String> {
    scheduler
        .schedule_meeting(details)
        .await
        .map_err(|e| format!("Failed to schedule meeting: {}", e))
}

pub async fn cancel_meeting(
    details: &CancelDetails,
    scheduler: &SchedulerManager,
) -> Result<(), String> {
    scheduler
        .cancel_meeting(details)
        .await
        .map_err(|e| format!("Failed to cancel meeting: {}", e))
}

pub async fn reschedule_meeting(
    previous_start_time: &NumberInput,
    details: &ScheduleDetails,
    scheduler: &SchedulerManager,
) -> Result<Meeting, String> {
    scheduler
        .reschedule_meeting(previous_start_time, details)
        .await
        .map_err(|e| format!("Failed to update meeting: {}", e))
}

pub async fn get_meetings(scheduler: &SchedulerManager) -> Result<Vec<Meeting>, String> {
    scheduler
        .meetings()
        .await
        .map_err(|e| format!("Failed to load meetings: {}", e))
}

pub async fn report_join_status(
    report: &JoinStatusReport,
    scheduler: &SchedulerManager,
) -> Result<(), String> {
    log::info!("Join status update: {:?} for URL: {}", report.status, report.url);
    scheduler
        .on_join_status(report)
        .await
        .map_err(|e| format!("Failed to handle join status: {}", e))
}
