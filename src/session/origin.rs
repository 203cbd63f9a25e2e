use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

pub const UNTITLED: &str = "Untitled Recording";

/// Platform hosting the recorded page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    GoogleMeet,
    Zoom,
    Teams,
    Whereby,
    Discord,
    Browser,
}

impl Platform {
    pub fn detect(url: &str) -> Self {
        if url.contains("meet.google.com") {
            Platform::GoogleMeet
        } else if url.contains("zoom.us") {
            Platform::Zoom
        } else if url.contains("teams.microsoft.com") {
            Platform::Teams
        } else if url.contains("whereby.com") {
            Platform::Whereby
        } else if url.contains("discord.com") {
            Platform::Discord
        } else {
            Platform::Browser
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GoogleMeet => "google-meet",
            Platform::Zoom => "zoom",
            Platform::Teams => "teams",
            Platform::Whereby => "whereby",
            Platform::Discord => "discord",
            Platform::Browser => "browser",
        }
    }
}

/// Content category of the recorded page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingType {
    MeetingAudio,
    VideoAudio,
    GeneralAudio,
}

impl RecordingType {
    pub fn detect(url: &str) -> Self {
        if ["meet.google.com", "zoom.us", "teams.microsoft.com"]
            .iter()
            .any(|host| url.contains(host))
        {
            RecordingType::MeetingAudio
        } else if url.contains("youtube.com") || url.contains("vimeo.com") {
            RecordingType::VideoAudio
        } else {
            RecordingType::GeneralAudio
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingType::MeetingAudio => "meeting-audio",
            RecordingType::VideoAudio => "video-audio",
            RecordingType::GeneralAudio => "general-audio",
        }
    }
}

/// Where a recording was started from. Captured once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginContext {
    pub title: String,
    pub url: String,
    pub meeting_id: String,
    #[serde(rename = "source")]
    pub platform: Platform,
    pub recording_type: RecordingType,
}

impl OriginContext {
    pub fn from_page(url: &str, title: Option<&str>) -> Self {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();

        Self {
            title,
            url: url.to_string(),
            meeting_id: derive_meeting_id(url),
            platform: Platform::detect(url),
            recording_type: RecordingType::detect(url),
        }
    }
}

/// Short identifier derived from the page URL
pub fn derive_meeting_id(url: &str) -> String {
    let millis = Utc::now().timestamp_millis();

    let Ok(parsed) = Url::parse(url) else {
        return format!("recording_{}", millis);
    };
    let path = parsed.path();

    if url.contains("zoom.us") {
        match zoom_meeting_number(path) {
            Some(number) => format!("zoom_{}", number),
            None => format!("zoom_{}", millis),
        }
    } else if url.contains("meet.google.com") {
        let code = path.trim_start_matches('/');
        if code.is_empty() {
            format!("meet_{}", millis)
        } else {
            format!("meet_{}", code)
        }
    } else if url.contains("teams.microsoft.com") {
        format!("teams_{}", millis)
    } else {
        format!("web_{}_{}", parsed.host_str().unwrap_or_default(), millis)
    }
}

fn zoom_meeting_number(path: &str) -> Option<&str> {
    let (_, rest) = path.split_once("/j/")?;
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let number = &rest[..end];
    (!number.is_empty()).then_some(number)
}
