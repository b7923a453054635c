use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One locale variant of an event document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    pub document_id: String,
    pub locale: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub slug: Option<String>,
    pub published: bool,
    pub cover: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Event variant ready to be inserted; the repository assigns the numeric id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub document_id: String,
    pub locale: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub slug: Option<String>,
    pub published: bool,
    pub cover: Option<Value>,
}

/// Request body for create and update. Absent attributes are left untouched on update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub all_day: Option<bool>,
    pub slug: Option<String>,
    pub cover: Option<Value>,
    pub published: Option<bool>,
    pub document_id: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub upcoming: Option<String>,
    pub locale: Option<String>,
    #[serde(rename = "includeUnpublished")]
    pub include_unpublished: Option<String>,
}

impl EventQuery {
    pub fn locale(&self) -> &str {
        self.locale
            .as_deref()
            .filter(|locale| !locale.is_empty())
            .unwrap_or("en")
    }

    pub fn upcoming(&self) -> bool {
        self.upcoming.as_deref() == Some("true")
    }

    pub fn include_unpublished(&self) -> bool {
        self.include_unpublished.as_deref() == Some("true")
    }
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) or a bare date
/// (midnight UTC).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}
