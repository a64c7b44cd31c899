use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const XPATH_PREFIX: &str = "xpath:";
const CONTAINS_MARKER: &str = ":contains(";

static CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?s)(.*?):contains\(\s*["']?(.*?)["']?\s*\)$"#).unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,
    #[error("unterminated :contains() in {0}")]
    UnterminatedContains(String),
    #[error("empty xpath expression")]
    EmptyXPath,
}

/// One way of locating an element on a meeting page.
///
/// The textual form is what the strategy tables store:
/// - `xpath://button[...]` is an XPath expression
/// - `scope:contains("Join")` matches any button, span or div whose text
///   contains the needle (case-insensitive) and resolves to the enclosing button
/// - anything else is a CSS selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    Css(String),
    Text { scope: String, text: String },
    XPath(String),
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SelectorError::Empty);
        }

        if let Some(expr) = raw.strip_prefix(XPATH_PREFIX) {
            let expr = expr.trim();
            if expr.is_empty() {
                return Err(SelectorError::EmptyXPath);
            }
            return Ok(Selector::XPath(expr.to_string()));
        }

        if let Some(caps) = CONTAINS.captures(raw) {
            return Ok(Selector::Text {
                scope: caps[1].trim().to_string(),
                text: caps[2].to_string(),
            });
        }
        if raw.contains(CONTAINS_MARKER) {
            return Err(SelectorError::UnterminatedContains(raw.to_string()));
        }

        Ok(Selector::Css(raw.to_string()))
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => f.write_str(css),
            Selector::Text { scope, text } => write!(f, "{}:contains(\"{}\")", scope, text),
            Selector::XPath(expr) => write!(f, "{}{}", XPATH_PREFIX, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "button[aria-label=\"Join now\"]".parse::<Selector>().unwrap(),
            Selector::Css("button[aria-label=\"Join now\"]".to_string())
        );
        assert_eq!(
            "div[jsname=\"Qx7uuf\"] span:contains(\"Ask\")"
                .parse::<Selector>()
                .unwrap(),
            Selector::Text {
                scope: "div[jsname=\"Qx7uuf\"] span".to_string(),
                text: "Ask".to_string(),
            }
        );
        assert_eq!(
            "xpath://button[contains(., \"Join\")]"
                .parse::<Selector>()
                .unwrap(),
            Selector::XPath("//button[contains(., \"Join\")]".to_string())
        );
    }

    #[test]
    fn test_display_restores_source_text() {
        for raw in [
            "button#joinBtn",
            "button:contains(\"Join with Computer Audio\")",
            "xpath://span[contains(text(), \"Join now\")]/ancestor::button",
        ] {
            assert_eq!(raw.parse::<Selector>().unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!("  ".parse::<Selector>(), Err(SelectorError::Empty));
        assert_eq!("xpath:".parse::<Selector>(), Err(SelectorError::EmptyXPath));
        assert!(matches!(
            "button:contains(\"Join\"".parse::<Selector>(),
            Err(SelectorError::UnterminatedContains(_))
        ));
    }

    #[test]
    fn test_contains_quoting_variants() {
        let expected = Selector::Text {
            scope: "button".to_string(),
            text: "Join now".to_string(),
        };
        for raw in [
            "button:contains(\"Join now\")",
            "button:contains('Join now')",
            "button:contains( Join now )",
            "button :contains(\"Join now\")  ",
        ] {
            assert_eq!(raw.parse::<Selector>().unwrap(), expected, "{}", raw);
        }
        assert!(matches!(
            "button:contains(\"Join\") span".parse::<Selector>(),
            Err(SelectorError::UnterminatedContains(_))
        ));
    }
}
