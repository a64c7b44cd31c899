use super::selector::Selector;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// Things the page tells the detector about between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// DOM subtree changed; coalesced into a single re-evaluation
    Mutated,
    /// Page became visible again
    Visible,
    Online,
    Offline,
    /// Load completed
    Loaded,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("selector {selector} could not be evaluated: {message}")]
    Selector { selector: String, message: String },
    #[error("page is gone")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// The meeting tab as seen by the join detector.
///
/// Text selectors match button, span or div elements by case-insensitive text
/// containment and resolve to the closest enclosing button.
#[async_trait]
pub trait MeetingPage: Send + Sync {
    fn url(&self) -> String;

    async fn ready_state(&self) -> Result<ReadyState, PageError>;

    /// True if at least one element matches
    async fn exists(&self, selector: &Selector) -> Result<bool, PageError>;

    /// Clicks the first visible match. `Ok(false)` when nothing visible matched.
    async fn click(&self, selector: &Selector) -> Result<bool, PageError>;

    async fn reload(&self) -> Result<(), PageError>;
}
