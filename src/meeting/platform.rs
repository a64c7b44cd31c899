use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Video-call platform a meeting link belongs to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Google,
    Zoom,
    Teams,
    Webex,
    #[serde(alias = "unknown")]
    Other,
}

struct PlatformRule {
    needle: &'static str,
    platform: Platform,
    close_pattern: &'static str,
}

/// New platforms are added here; order decides ties.
const PLATFORM_RULES: &[PlatformRule] = &[
    PlatformRule {
        needle: "meet.google.com",
        platform: Platform::Google,
        close_pattern: "*://meet.google.com/*",
    },
    PlatformRule {
        needle: "zoom.us",
        platform: Platform::Zoom,
        close_pattern: "*://*.zoom.us/j/*",
    },
    PlatformRule {
        needle: "teams.microsoft.com",
        platform: Platform::Teams,
        close_pattern: "*://*.teams.microsoft.com/*",
    },
    PlatformRule {
        needle: "webex.com",
        platform: Platform::Webex,
        close_pattern: "*://*.webex.com/meet/*",
    },
];

impl Platform {
    /// Substring match of the URL against the platform table
    pub fn detect(url: &str) -> Self {
        PLATFORM_RULES
            .iter()
            .find(|rule| url.contains(rule.needle))
            .map(|rule| rule.platform)
            .unwrap_or(Platform::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Google => "google",
            Platform::Zoom => "zoom",
            Platform::Teams => "teams",
            Platform::Webex => "webex",
            Platform::Other => "other",
        }
    }

    /// Pattern selecting every open tab that belongs to a meeting on this platform.
    /// Unlisted platforms close tabs on the link's own host.
    pub fn close_pattern(&self, link: &str) -> Option<UrlPattern> {
        if let Some(rule) = PLATFORM_RULES.iter().find(|r| r.platform == *self) {
            return UrlPattern::parse(rule.close_pattern);
        }
        let host = Url::parse(link).ok()?.host_str()?.to_string();
        UrlPattern::parse(&format!("*://{}/*", host))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short identifier used to de-duplicate join attempts.
///
/// Google Meet: last path segment (`abc-defg-hij`). Zoom: the segment after `/j/`.
/// Everything else, and anything unparseable, uses the full URL.
pub fn meeting_id_from_url(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("Error extracting meeting ID from URL {}: {}", url, e);
            return url.to_string();
        }
    };
    let host = parsed.host_str().unwrap_or_default();
    let parts: Vec<&str> = parsed.path().split('/').collect();

    let id = if host.contains("meet.google.com") {
        parts.last().copied()
    } else if host.contains("zoom.us") {
        parts.get(2).copied()
    } else {
        None
    };

    match id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => url.to_string(),
    }
}

/// Browser-style URL match pattern: `<scheme>://<host><path>` where the scheme may be
/// `*` (http or https), the host may be `*` or start with `*.` (domain and its
/// subdomains), and `*` in the path matches any run of characters.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        let (scheme, rest) = pattern.split_once("://")?;
        let slash = rest.find('/')?;
        let (host, path) = rest.split_at(slash);
        if scheme.is_empty() || host.is_empty() {
            return None;
        }

        let scheme = match scheme {
            "*" => "https?".to_string(),
            s => regex::escape(&s.to_ascii_lowercase()),
        };
        let host = host.to_ascii_lowercase();
        let host = if host == "*" {
            "[^/]+".to_string()
        } else if let Some(domain) = host.strip_prefix("*.") {
            format!(r"([^/]+\.)?{}", regex::escape(domain))
        } else {
            regex::escape(&host)
        };
        let path = path
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = match Regex::new(&format!("^{}://{}{}$", scheme, host, path)) {
            Ok(regex) => regex,
            Err(e) => {
                log::warn!("Invalid URL pattern {}: {}", pattern, e);
                return None;
            }
        };
        Some(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let mut target = format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
            parsed.path()
        );
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }
        self.regex.is_match(&target)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for UrlPattern {}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
