use crate::error::AgentError;
use crate::meeting::platform::{meeting_id_from_url, Platform};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static LEADING_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([+-]?\d+)").unwrap());

/// A persisted intent to join a call at `start_time` and close it
/// `auto_close_duration` minutes later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub link: String,
    /// Epoch milliseconds
    pub start_time: i64,
    /// Minutes
    pub auto_close_duration: i64,
    /// Cached at creation; records written without it derive it from `link`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub scheduled: i64,
    #[serde(default)]
    pub joined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub join_attempts: u32,
}

/// Coordination record for a tab the scheduler believes is trying to join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJoinAttempt {
    pub start_time: i64,
    pub attempts: u32,
    /// Epoch milliseconds of the last tab open
    pub timestamp: i64,
}

pub type ActiveJoinAttempts = BTreeMap<String, ActiveJoinAttempt>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Joined,
    Failed,
}

/// Outcome reported by a join detector for the page it was running on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinStatusReport {
    pub status: JoinStatus,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JoinStatusReport {
    pub fn joined(url: &str) -> Self {
        Self {
            status: JoinStatus::Joined,
            url: url.to_string(),
            reason: None,
        }
    }

    pub fn failed(url: &str, reason: &str) -> Self {
        Self {
            status: JoinStatus::Failed,
            url: url.to_string(),
            reason: Some(reason.to_string()),
        }
    }
}

/// Numbers arrive from forms as either JSON numbers or strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumberInput {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberInput {
    /// Integer value, reading strings by their leading integer (`"90min"` → 90)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NumberInput::Int(v) => Some(*v),
            NumberInput::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            NumberInput::Float(_) => None,
            NumberInput::Text(s) => parse_leading_int(s),
        }
    }
}

impl From<i64> for NumberInput {
    fn from(v: i64) -> Self {
        NumberInput::Int(v)
    }
}

fn parse_leading_int(s: &str) -> Option<i64> {
    LEADING_INT.captures(s)?.get(1)?.as_str().parse().ok()
}

/// `scheduleMeeting` payload as received over the message channel
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDetails {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub start_time: Option<NumberInput>,
    #[serde(default)]
    pub auto_close_duration: Option<NumberInput>,
}

/// `cancelMeeting` payload
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelDetails {
    #[serde(default)]
    pub start_time: Option<NumberInput>,
}

/// Schedule input that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSchedule {
    pub link: String,
    pub start_time: i64,
    pub auto_close_duration: i64,
}

impl ScheduleDetails {
    pub fn new(link: &str, start_time: i64, auto_close_duration: i64) -> Self {
        Self {
            link: Some(link.to_string()),
            start_time: Some(NumberInput::Int(start_time)),
            auto_close_duration: Some(NumberInput::Int(auto_close_duration)),
        }
    }

    pub fn validate(&self, max_auto_close_minutes: i64) -> Result<ValidSchedule, AgentError> {
        let link = self
            .link
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| AgentError::validation("Invalid meeting details provided"))?;
        if !link.starts_with("http://") && !link.starts_with("https://") {
            return Err(AgentError::validation(
                "Meeting link must start with http:// or https://",
            ));
        }

        let start_time = self
            .start_time
            .as_ref()
            .ok_or_else(|| AgentError::validation("Invalid meeting details provided"))?
            .as_i64()
            .filter(|t| *t > 0)
            .ok_or_else(|| AgentError::validation("Invalid start time"))?;

        let auto_close_duration = self
            .auto_close_duration
            .as_ref()
            .ok_or_else(|| AgentError::validation("Invalid meeting details provided"))?
            .as_i64()
            .ok_or_else(|| AgentError::validation("Invalid auto close duration"))?;
        if auto_close_duration <= 0 || auto_close_duration > max_auto_close_minutes {
            return Err(AgentError::validation(format!(
                "Auto-close duration must be between 1 and {} minutes",
                max_auto_close_minutes
            )));
        }

        Ok(ValidSchedule {
            link: link.to_string(),
            start_time,
            auto_close_duration,
        })
    }
}

impl CancelDetails {
    pub fn new(start_time: i64) -> Self {
        Self {
            start_time: Some(NumberInput::Int(start_time)),
        }
    }

    pub fn validate(&self) -> Result<i64, AgentError> {
        self.start_time
            .as_ref()
            .ok_or_else(|| AgentError::validation("Invalid meeting details for cancellation"))?
            .as_i64()
            .filter(|t| *t > 0)
            .ok_or_else(|| AgentError::validation("Invalid start time for cancellation"))
    }
}

impl Meeting {
    pub fn new(schedule: ValidSchedule, now_ms: i64) -> Self {
        let platform = Platform::detect(&schedule.link);
        let id = meeting_id_from_url(&schedule.link);
        Self {
            link: schedule.link,
            start_time: schedule.start_time,
            auto_close_duration: schedule.auto_close_duration,
            platform: Some(platform),
            id: Some(id),
            scheduled: now_ms,
            joined: false,
            joined_at: None,
            completed: false,
            join_attempts: 0,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(|| Platform::detect(&self.link))
    }

    pub fn meeting_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => meeting_id_from_url(&self.link),
        }
    }

    /// Epoch ms at which the meeting tab should be closed
    pub fn close_time(&self) -> i64 {
        self.start_time + self.auto_close_duration * 60 * 1000
    }

    pub fn is_same_slot(&self, link: &str, start_time: i64) -> bool {
        self.link == link && self.start_time == start_time
    }

    /// Eligible for an autonomous join attempt: not finished, started, inside the
    /// join window, and no tab already trying.
    pub fn is_eligible(&self, now_ms: i64, join_window_ms: i64, attempts: &ActiveJoinAttempts) -> bool {
        !self.completed
            && !self.joined
            && self.start_time <= now_ms
            && now_ms - self.start_time < join_window_ms
            && !attempts.contains_key(&self.meeting_id())
    }
}

impl ActiveJoinAttempt {
    pub fn new(start_time: i64, now_ms: i64) -> Self {
        Self {
            start_time,
            attempts: 1,
            timestamp: now_ms,
        }
    }

    pub fn is_stale(&self, now_ms: i64, stale_ms: i64) -> bool {
        self.timestamp < now_ms - stale_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60 * 1000;

    fn meeting(start_time: i64) -> Meeting {
        Meeting::new(
            ScheduleDetails::new("https://meet.google.com/abc-defg-hij", start_time, 30)
                .validate(1440)
                .unwrap(),
            0,
        )
    }

    #[test]
    fn test_number_input_parsing() {
        assert_eq!(NumberInput::Int(5).as_i64(), Some(5));
        assert_eq!(NumberInput::Float(5.9).as_i64(), Some(5));
        assert_eq!(NumberInput::Float(f64::NAN).as_i64(), None);
        assert_eq!(NumberInput::Text(" 90min".into()).as_i64(), Some(90));
        assert_eq!(NumberInput::Text("-3".into()).as_i64(), Some(-3));
        assert_eq!(NumberInput::Text("abc".into()).as_i64(), None);
        assert_eq!(NumberInput::Text("".into()).as_i64(), None);
        assert_eq!(NumberInput::Text("+45 minutes".into()).as_i64(), Some(45));
        assert_eq!(NumberInput::Text("- 5".into()).as_i64(), None);
        assert_eq!(NumberInput::Text("99999999999999999999".into()).as_i64(), None);
    }

    #[test]
    fn test_schedule_validation() {
        let ok = ScheduleDetails::new("https://zoom.us/j/1", 1_700_000_000_000, 60)
            .validate(1440)
            .unwrap();
        assert_eq!(ok.auto_close_duration, 60);

        let missing_link = ScheduleDetails {
            link: None,
            ..ScheduleDetails::new("x", 1, 1)
        };
        assert!(matches!(missing_link.validate(1440), Err(AgentError::Validation(_))));

        let bad_scheme = ScheduleDetails::new("ftp://zoom.us/j/1", 1, 1);
        assert!(bad_scheme.validate(1440).is_err());

        let text_time = ScheduleDetails {
            start_time: Some(NumberInput::Text("soon".into())),
            ..ScheduleDetails::new("https://zoom.us/j/1", 1, 1)
        };
        let err = text_time.validate(1440).unwrap_err();
        assert_eq!(err.to_string(), "Invalid start time");

        assert!(ScheduleDetails::new("https://zoom.us/j/1", 1, 0).validate(1440).is_err());
        assert!(ScheduleDetails::new("https://zoom.us/j/1", 1, 1441).validate(1440).is_err());
        assert!(ScheduleDetails::new("https://zoom.us/j/1", 1, 1440).validate(1440).is_ok());
    }

    #[test]
    fn test_schedule_details_wire_format() {
        let details: ScheduleDetails = serde_json::from_str(
            r#"{"link":"https://meet.google.com/abc","startTime":"1700000000000","autoCloseDuration":45}"#,
        )
        .unwrap();
        let valid = details.validate(1440).unwrap();
        assert_eq!(valid.start_time, 1_700_000_000_000);
        assert_eq!(valid.auto_close_duration, 45);
    }

    #[test]
    fn test_new_meeting_caches_platform_and_id() {
        let m = meeting(10 * MIN);
        assert_eq!(m.platform, Some(Platform::Google));
        assert_eq!(m.id.as_deref(), Some("abc-defg-hij"));
        assert_eq!(m.close_time(), 40 * MIN);
        assert!(!m.joined && !m.completed);
        assert_eq!(m.join_attempts, 0);
    }

    #[test]
    fn test_legacy_record_derives_id_and_platform() {
        let m: Meeting = serde_json::from_str(
            r#"{"link":"https://zoom.us/j/42","startTime":1,"autoCloseDuration":5}"#,
        )
        .unwrap();
        assert_eq!(m.platform(), Platform::Zoom);
        assert_eq!(m.meeting_id(), "42");
        assert_eq!(m.join_attempts, 0);
    }

    #[test]
    fn test_eligibility_window() {
        let now = 100 * MIN;
        let window = 30 * MIN;
        let attempts = ActiveJoinAttempts::new();

        assert!(meeting(now - 5 * MIN).is_eligible(now, window, &attempts));
        assert!(meeting(now).is_eligible(now, window, &attempts));
        assert!(!meeting(now + MIN).is_eligible(now, window, &attempts));
        assert!(!meeting(now - 30 * MIN).is_eligible(now, window, &attempts));
        assert!(!meeting(now - 40 * MIN).is_eligible(now, window, &attempts));

        let mut joined = meeting(now - MIN);
        joined.joined = true;
        assert!(!joined.is_eligible(now, window, &attempts));

        let mut completed = meeting(now - MIN);
        completed.completed = true;
        assert!(!completed.is_eligible(now, window, &attempts));

        let mut in_flight = ActiveJoinAttempts::new();
        in_flight.insert("abc-defg-hij".into(), ActiveJoinAttempt::new(now - MIN, now));
        assert!(!meeting(now - MIN).is_eligible(now, window, &in_flight));
    }

    #[test]
    fn test_join_status_wire_format() {
        let report: JoinStatusReport = serde_json::from_str(
            r#"{"status":"failed","url":"https://zoom.us/j/1","reason":"timeout"}"#,
        )
        .unwrap();
        assert_eq!(report, JoinStatusReport::failed("https://zoom.us/j/1", "timeout"));
        assert_eq!(
            serde_json::to_string(&JoinStatusReport::joined("u")).unwrap(),
            r#"{"status":"joined","url":"u"}"#
        );
    }

    #[test]
    fn test_attempt_staleness() {
        let a = ActiveJoinAttempt::new(0, 0);
        assert!(!a.is_stale(10 * MIN, 10 * MIN));
        assert!(a.is_stale(10 * MIN + 1, 10 * MIN));
    }
}
