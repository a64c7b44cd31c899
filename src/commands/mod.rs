pub mod meeting;
pub mod system;

use crate::managers::scheduler::SchedulerManager;
use crate::meeting::{
    CancelDetails, JoinStatus, JoinStatusReport, Meeting, NumberInput, ScheduleDetails,
};
use crate::storage::{ErrorLogEntry, Severity};
use serde::{Deserialize, Serialize};

/// Inbound message, tagged by `action`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    ScheduleMeeting {
        #[serde(default)]
        details: ScheduleDetails,
    },
    CancelMeeting {
        #[serde(default)]
        details: CancelDetails,
    },
    #[serde(rename_all = "camelCase")]
    RescheduleMeeting {
        previous_start_time: NumberInput,
        #[serde(default)]
        details: ScheduleDetails,
    },
    #[serde(rename = "joinStatus")]
    JoinStatusUpdate {
        status: JoinStatus,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempts: Option<u32>,
    },
    CheckNetworkStatus,
    GetErrorLogs,
    ClearErrorLogs,
    GetMeetings,
    LogError {
        message: String,
        #[serde(default)]
        platform: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Outbound reply. The shape depends on the request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Status {
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Network {
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Logs {
        logs: Vec<ErrorLogEntry>,
    },
    Meetings {
        meetings: Vec<Meeting>,
    },
}

impl Response {
    pub fn success() -> Self {
        Response::Status {
            status: ResponseStatus::Success,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Status {
            status: ResponseStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Response::Status {
                status: ResponseStatus::Error,
                ..
            }
        )
    }
}

/// Runs one request against the scheduler. Failures become error responses and
/// are recorded in the persisted error log.
pub async fn dispatch(scheduler: &SchedulerManager, request: Request) -> Response {
    let result = match request {
        Request::ScheduleMeeting { details } => meeting::schedule_meeting(&details, scheduler)
            .await
            .map(|_| Response::success()),
        Request::CancelMeeting { details } => meeting::cancel_meeting(&details, scheduler)
            .await
            .map(|_| Response::success()),
        Request::RescheduleMeeting {
            previous_start_time,
            details,
        } => meeting::reschedule_meeting(&previous_start_time, &details, scheduler)
            .await
            .map(|_| Response::success()),
        Request::JoinStatusUpdate {
            status, url, reason, ..
        } => {
            let report = JoinStatusReport {
                status,
                url,
                reason,
            };
            meeting::report_join_status(&report, scheduler)
                .await
                .map(|_| Response::success())
        }
        Request::GetMeetings => meeting::get_meetings(scheduler)
            .await
            .map(|meetings| Response::Meetings { meetings }),
        Request::CheckNetworkStatus => {
            return match system::check_network_status(scheduler).await {
                Ok(online) => Response::Network {
                    online,
                    error: None,
                },
                Err(e) => {
                    scheduler.error_log().record(Severity::Error, &e, true).await;
                    Response::Network {
                        online: false,
                        error: Some(e),
                    }
                }
            };
        }
        Request::GetErrorLogs => system::get_error_logs(scheduler)
            .await
            .map(|logs| Response::Logs { logs }),
        Request::ClearErrorLogs => system::clear_error_logs(scheduler)
            .await
            .map(|_| Response::success()),
        Request::LogError {
            message,
            platform,
            url,
        } => {
            system::log_error(&message, platform.as_deref(), url.as_deref(), scheduler).await;
            Ok(Response::success())
        }
    };

    match result {
        Ok(response) => response,
        Err(message) => {
            scheduler
                .error_log()
                .record(Severity::Error, &message, true)
                .await;
            Response::error(message)
        }
    }
}
