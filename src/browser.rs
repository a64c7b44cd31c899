use crate::error::AgentError;
use crate::meeting::UrlPattern;
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Tab operations the scheduler needs from a browser.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_tab(&self, url: &str) -> Result<(), AgentError>;

    /// Closes every open tab whose URL matches; returns how many were closed.
    async fn close_tabs(&self, pattern: &UrlPattern) -> Result<usize, AgentError>;
}

/// User-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) {
        log::info!("[notification] {}: {}", title, message);
    }
}

struct LaunchedTab {
    url: String,
    child: Child,
}

/// Opens meeting URLs either by launching a configured browser command once per
/// tab, or through the system URL handler. Only launched tabs can be closed.
pub struct LaunchedBrowser {
    argv: Option<Vec<String>>,
    tabs: Mutex<Vec<LaunchedTab>>,
}

impl LaunchedBrowser {
    pub fn new(argv: Option<Vec<String>>) -> Self {
        Self {
            argv: argv.filter(|a| !a.is_empty()),
            tabs: Mutex::new(Vec::new()),
        }
    }

    pub async fn open_count(&self) -> usize {
        let mut tabs = self.tabs.lock().await;
        tabs.retain_mut(|tab| matches!(tab.child.try_wait(), Ok(None)));
        tabs.len()
    }
}

#[async_trait]
impl Browser for LaunchedBrowser {
    async fn open_tab(&self, url: &str) -> Result<(), AgentError> {
        let Some(argv) = &self.argv else {
            open::that_detached(url)
                .map_err(|e| AgentError::Browser(format!("Failed to open {}: {}", url, e)))?;
            log::info!("Opened {} with the system handler", url);
            return Ok(());
        };

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .arg(url)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Browser(format!("Failed to launch {}: {}", argv[0], e)))?;
        log::info!("Launched {} for {} (pid {:?})", argv[0], url, child.id());
        self.tabs.lock().await.push(LaunchedTab {
            url: url.to_string(),
            child,
        });
        Ok(())
    }

    async fn close_tabs(&self, pattern: &UrlPattern) -> Result<usize, AgentError> {
        if self.argv.is_none() {
            log::warn!(
                "Cannot close tabs matching {}: no browser command configured",
                pattern
            );
            return Ok(0);
        }

        let mut tabs = self.tabs.lock().await;
        let mut closed = 0;
        let mut kept = Vec::with_capacity(tabs.len());
        for mut tab in tabs.drain(..) {
            if !pattern.matches(&tab.url) {
                kept.push(tab);
                continue;
            }
            match tab.child.kill().await {
                Ok(()) => closed += 1,
                Err(e) => log::warn!("Failed to close tab {}: {}", tab.url, e),
            }
        }
        *tabs = kept;
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launched_tabs_close_by_pattern() {
        let argv = ["sh", "-c", "sleep 30", "tab"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let browser = LaunchedBrowser::new(Some(argv));

        browser.open_tab("https://meet.google.com/abc-defg-hij").await.unwrap();
        browser.open_tab("https://zoom.us/j/1").await.unwrap();
        assert_eq!(browser.open_count().await, 2);

        let google = UrlPattern::parse("*://meet.google.com/*").unwrap();
        assert_eq!(browser.close_tabs(&google).await.unwrap(), 1);
        assert_eq!(browser.close_tabs(&google).await.unwrap(), 0);
        assert_eq!(browser.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_browser_error() {
        let browser = LaunchedBrowser::new(Some(vec!["/nonexistent/browser-bin".to_string()]));
        let err = browser.open_tab("https://zoom.us/j/1").await.unwrap_err();
        assert!(matches!(err, AgentError::Browser(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_without_command_is_noop() {
        let browser = LaunchedBrowser::new(None);
        let pattern = UrlPattern::parse("*://meet.google.com/*").unwrap();
        assert_eq!(browser.close_tabs(&pattern).await.unwrap(), 0);
    }
}
