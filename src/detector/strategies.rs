use super::selector::Selector;
use crate::meeting::Platform;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Ordered selector lists for one platform. Earlier entries are tried first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PlatformStrategies {
    pub join: Vec<Selector>,
    pub dismiss: Vec<Selector>,
    pub in_call: Vec<Selector>,
    /// Controls that are currently "on"; clicking one turns it off
    pub mute_microphone: Vec<Selector>,
    pub mute_camera: Vec<Selector>,
}

/// Data-driven DOM strategies. A platform table present in a strategies file
/// replaces that platform's built-in lists; omitted tables keep the built-ins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StrategyTable {
    #[serde(default = "default_loading")]
    pub loading: Vec<Selector>,
    #[serde(default = "default_poor_connection")]
    pub poor_connection: Vec<Selector>,
    #[serde(default = "default_google")]
    pub google: PlatformStrategies,
    #[serde(default = "default_zoom")]
    pub zoom: PlatformStrategies,
    #[serde(default = "default_teams")]
    pub teams: PlatformStrategies,
    #[serde(default = "default_webex")]
    pub webex: PlatformStrategies,
    #[serde(default = "default_other")]
    pub other: PlatformStrategies,
}

static BUILTIN: Lazy<StrategyTable> = Lazy::new(|| StrategyTable {
    loading: default_loading(),
    poor_connection: default_poor_connection(),
    google: default_google(),
    zoom: default_zoom(),
    teams: default_teams(),
    webex: default_webex(),
    other: default_other(),
});

impl Default for StrategyTable {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl StrategyTable {
    pub fn builtin() -> &'static StrategyTable {
        &BUILTIN
    }

    pub fn for_platform(&self, platform: Platform) -> &PlatformStrategies {
        match platform {
            Platform::Google => &self.google,
            Platform::Zoom => &self.zoom,
            Platform::Teams => &self.teams,
            Platform::Webex => &self.webex,
            Platform::Other => &self.other,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategies {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse strategies {}", path.display()))
    }

    /// Loads an override file if one is configured, falling back to built-ins.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(table) => {
                log::info!("Loaded join strategies from {}", path.display());
                table
            }
            Err(e) => {
                log::warn!("{:#}, using built-in strategies", e);
                Self::default()
            }
        }
    }
}

fn selectors(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| match s.parse() {
            Ok(selector) => Some(selector),
            Err(e) => {
                log::error!("Dropping built-in selector {}: {}", s, e);
                None
            }
        })
        .collect()
}

fn default_loading() -> Vec<Selector> {
    selectors(&[".loading-indicator", ".loadingIndicator", "[role=\"progressbar\"]"])
}

fn default_poor_connection() -> Vec<Selector> {
    selectors(&[
        ".poor-connection-indicator",
        "[aria-label*=\"Poor connection\"]",
        "[aria-label*=\"Unstable connection\"]",
        "[data-tid=\"network-warning\"]",
    ])
}

fn default_google() -> PlatformStrategies {
    PlatformStrategies {
        join: selectors(&[
            "button[data-tooltip=\"Join now\"]",
            "button[aria-label=\"Join now\"]",
            "button[aria-label=\"Ask to join\"]",
            "span[jsname=\"V67aGc\"]:contains(\"Join now\")",
            "span[jsname=\"V67aGc\"]:contains(\"Ask to join\")",
            "div[jsname=\"Qx7uuf\"] span:contains(\"Join\")",
            "div[jsname=\"Qx7uuf\"] span:contains(\"Ask\")",
            "xpath://button[contains(., \"Join\")]",
            "xpath://button[contains(., \"Ask to join\")]",
            "xpath://span[contains(text(), \"Join now\")]/ancestor::button",
            "xpath://span[contains(text(), \"Ask to join\")]/ancestor::button",
        ]),
        dismiss: selectors(&[
            "button[aria-label=\"Close\"]",
            "button[aria-label=\"Dismiss\"]",
            "button[data-tooltip=\"Close\"]",
            "button:contains(\"Close\")",
            "button:contains(\"Dismiss\")",
            "button:contains(\"No thanks\")",
            "button:contains(\"Not now\")",
            "button[aria-label=\"Got it\"]",
            "button:contains(\"Got it\")",
            "xpath://button[contains(., \"Close\")]",
            "xpath://button[contains(., \"Dismiss\")]",
        ]),
        in_call: selectors(&[
            ".zWfAib",
            "[data-allocation-index]",
            "div[jscontroller=\"kAPMuc\"]",
            "button[aria-label=\"Turn off microphone\"]",
            "button[aria-label=\"Turn off camera\"]",
            "button[aria-label=\"Present now\"]",
            "div[aria-label=\"Chat with everyone\"]",
        ]),
        mute_microphone: selectors(&[
            "button[aria-label=\"Turn off microphone\"]",
            "button[data-tooltip=\"Turn off microphone\"]",
            "button[aria-pressed=\"true\"][aria-label*=\"microphone\"]",
        ]),
        mute_camera: selectors(&[
            "button[aria-label=\"Turn off camera\"]",
            "button[data-tooltip=\"Turn off camera\"]",
            "button[aria-pressed=\"true\"][aria-label*=\"camera\"]",
        ]),
    }
}

fn default_zoom() -> PlatformStrategies {
    PlatformStrategies {
        join: selectors(&[
            "button:contains(\"Join\")",
            "button:contains(\"Join with Computer Audio\")",
            "button:contains(\"Join Audio\")",
            "button:contains(\"Join with Video\")",
            "button:contains(\"Join without Video\")",
            "button#joinBtn",
            "button.join-btn",
            "xpath://button[contains(., \"Join\")]",
        ]),
        dismiss: selectors(&[
            "button:contains(\"Got it\")",
            "button:contains(\"I Agree\")",
            "button:contains(\"Accept\")",
            "button.btn-confirm",
            "button:contains(\"Later\")",
        ]),
        in_call: selectors(&[
            ".meeting-app",
            ".meeting-client",
            ".meeting-info-container",
            "button[aria-label=\"mute my microphone\"]",
            "button[aria-label=\"stop my video\"]",
            ".footer-button__wrapper",
            ".video-avatar__container",
        ]),
        mute_microphone: selectors(&[
            "button[aria-label=\"mute my microphone\"]",
            "button[aria-label=\"Mute\"]",
            "button.join-audio-container__btn",
        ]),
        mute_camera: selectors(&[
            "button[aria-label=\"stop my video\"]",
            "button[aria-label=\"Stop Video\"]",
        ]),
    }
}

fn default_teams() -> PlatformStrategies {
    PlatformStrategies {
        join: selectors(&[
            "button:contains(\"Join now\")",
            "button:contains(\"Join meeting\")",
            "button[data-tid=\"prejoin-join-button\"]",
            "button[data-tid=\"call-prejoin-join-button\"]",
            "xpath://button[contains(., \"Join\")]",
        ]),
        dismiss: selectors(&[
            "button:contains(\"Got it\")",
            "button:contains(\"Dismiss\")",
            "button:contains(\"Accept\")",
            "button:contains(\"Allow\")",
        ]),
        in_call: selectors(&[
            ".ts-calling-screen",
            ".ts-video-screen",
            ".calling-unified-bar",
            "button[data-tid=\"toggle-mute\"]",
            "button[data-tid=\"toggle-video\"]",
            ".ts-calling-screen-main",
            ".meeting-control-bar",
        ]),
        mute_microphone: selectors(&[
            "button[data-tid=\"toggle-mute\"]",
            "button[data-tid=\"call-control-mute\"]",
            "button[title*=\"Mute\"]",
        ]),
        mute_camera: selectors(&[
            "button[data-tid=\"toggle-video\"]",
            "button[data-tid=\"call-control-video\"]",
            "button[title*=\"Camera\"]",
        ]),
    }
}

fn default_webex() -> PlatformStrategies {
    PlatformStrategies {
        join: selectors(&[
            "button:contains(\"Join meeting\")",
            "button:contains(\"Join\")",
            "button.join-meeting",
            "button#join-meeting-button",
            "xpath://button[contains(., \"Join\")]",
        ]),
        dismiss: selectors(&[
            "button:contains(\"Got it\")",
            "button:contains(\"Accept\")",
            "button:contains(\"Skip\")",
            "button:contains(\"Continue\")",
        ]),
        in_call: selectors(&[
            ".meeting-container",
            ".call-container",
            ".call-controls",
            "button[aria-label=\"Mute\"]",
            "button[aria-label=\"Stop video\"]",
            ".meeting-info-indicator",
            ".video-layout-container",
        ]),
        mute_microphone: selectors(&[
            "button[aria-label=\"Mute\"]",
            "button.mute-button",
            "button[title*=\"Mute\"]",
        ]),
        mute_camera: selectors(&[
            "button[aria-label=\"Stop video\"]",
            "button.video-button",
            "button[title*=\"video\"]",
        ]),
    }
}

fn default_other() -> PlatformStrategies {
    PlatformStrategies {
        join: selectors(&[
            "button:contains(\"Join\")",
            "button:contains(\"Enter\")",
            "button:contains(\"Start\")",
            "button.join-button",
            "button.primary-button",
            "xpath://button[contains(., \"Join\")]",
            "xpath://button[contains(., \"Enter\")]",
        ]),
        dismiss: Vec::new(),
        in_call: selectors(&[
            "video[autoplay]",
            "audio[autoplay]",
            ".meeting-container",
            ".video-container",
            ".call-controls",
            "button[aria-label*=\"mute\"]",
            "button[aria-label*=\"camera\"]",
            "button[aria-label*=\"video\"]",
            "button[aria-label*=\"leave\"]",
            "button[aria-label*=\"end\"]",
        ]),
        mute_microphone: selectors(&[
            "button[aria-label*=\"mute\"]",
            "button[title*=\"mute\"]",
            "button.mute-button",
            "button:contains(\"Mute\")",
        ]),
        mute_camera: selectors(&[
            "button[aria-label*=\"camera\"]",
            "button[aria-label*=\"video\"]",
            "button[title*=\"camera\"]",
            "button[title*=\"video\"]",
            "button.video-button",
            "button:contains(\"Stop video\")",
        ]),
    }
}
