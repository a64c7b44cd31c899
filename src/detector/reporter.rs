use crate::commands::Request;
use crate::error::AgentError;
use crate::meeting::{JoinStatus, Platform};
use crate::workers::scheduler_worker::SchedulerHandle;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Why a join gave up. The wire form is what the scheduler receives as `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MaxAttempts,
    Timeout,
    NetworkIssues,
    PageLoadTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MaxAttempts => "max_attempts",
            FailureReason::Timeout => "timeout",
            FailureReason::NetworkIssues => "network_issues",
            FailureReason::PageLoadTimeout => "page_load_timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound channel from a detector to the scheduler.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn joined(&self, url: &str) -> Result<(), AgentError>;

    async fn failed(
        &self,
        url: &str,
        reason: FailureReason,
        attempts: u32,
    ) -> Result<(), AgentError>;

    async fn log_error(&self, platform: Platform, url: &str, message: &str);
}

#[async_trait]
impl StatusReporter for SchedulerHandle {
    async fn joined(&self, url: &str) -> Result<(), AgentError> {
        deliver(
            self,
            Request::JoinStatusUpdate {
                status: JoinStatus::Joined,
                url: url.to_string(),
                reason: None,
                attempts: None,
            },
        )
        .await
    }

    async fn failed(
        &self,
        url: &str,
        reason: FailureReason,
        attempts: u32,
    ) -> Result<(), AgentError> {
        deliver(
            self,
            Request::JoinStatusUpdate {
                status: JoinStatus::Failed,
                url: url.to_string(),
                reason: Some(reason.as_str().to_string()),
                attempts: Some(attempts),
            },
        )
        .await
    }

    async fn log_error(&self, platform: Platform, url: &str, message: &str) {
        let request = Request::LogError {
            message: message.to_string(),
            platform: Some(platform.as_str().to_string()),
            url: Some(url.to_string()),
        };
        if let Err(e) = deliver(self, request).await {
            log::warn!("Could not forward error log: {}", e);
        }
    }
}

async fn deliver(handle: &SchedulerHandle, request: Request) -> Result<(), AgentError> {
    let response = handle.request(request).await;
    if response.is_success() {
        Ok(())
    } else {
        Err(AgentError::Delivery(format!("{:?}", response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::scheduler::tests::{meeting_at, Harness};
    use crate::settings::SchedulerSettings;
    use crate::storage::SchedulerState;
    use crate::workers::scheduler_worker;
    use tokio::sync::mpsc;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(FailureReason::PageLoadTimeout.as_str(), "page_load_timeout");
        assert_eq!(
            serde_json::to_value(FailureReason::NetworkIssues).unwrap(),
            serde_json::json!("network_issues")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_delivers_join_status() {
        let h = Harness::new();
        let link = "https://meet.google.com/abc-defg-hij";
        let mut state = SchedulerState::default();
        state.meetings.push(meeting_at(link, NOW));
        h.put(&state).await;

        let (_alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (handle, task) = scheduler_worker::spawn(
            h.manager.clone(),
            alarm_rx,
            h.clock.clone(),
            &SchedulerSettings::default(),
        );

        handle.joined(link).await.unwrap();
        assert!(h.state().await.meetings[0].joined);

        handle
            .log_error(Platform::Google, link, "Error checking join status")
            .await;
        let logs = h.manager.error_logs().await.unwrap();
        assert!(logs
            .iter()
            .any(|e| e.message.starts_with("[GOOGLE] Error checking join status")));

        handle.shutdown().await;
        task.await.unwrap();
        assert!(matches!(
            handle.joined(link).await,
            Err(AgentError::Delivery(_))
        ));
    }
}
