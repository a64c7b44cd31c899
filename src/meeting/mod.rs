pub mod model;
pub mod platform;

pub use model::{
    ActiveJoinAttempt, ActiveJoinAttempts, CancelDetails, JoinStatus, JoinStatusReport, Meeting,
    NumberInput, ScheduleDetails, ValidSchedule,
};
pub use platform::{meeting_id_from_url, Platform, UrlPattern};
