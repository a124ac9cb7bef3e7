//! Raw event → Record mapping
//!
//! Raw events follow the toast layout:
//!
//! ```text
//! {
//!   "creationTime": "2024-01-02T09:30:00Z",
//!   "appInfo": { "displayInfo": { "displayName": "Mail" } },
//!   "notification": { "visual": { "bindings": [
//!     { "textElements": [ { "text": "Title" }, { "text": "Body" } ] }
//!   ] } }
//! }
//! ```
//!
//! A missing `notification.visual.bindings` or an unparsable `creationTime`
//! makes the event unmappable. A missing app name never does.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::RawEvent;
use crate::domain::Record;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToastEvent {
    #[serde(default)]
    creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    app_info: Option<Value>,
    notification: ToastNotification,
}

#[derive(Debug, Deserialize)]
struct ToastNotification {
    visual: ToastVisual,
}

#[derive(Debug, Deserialize)]
struct ToastVisual {
    bindings: Vec<ToastBinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToastBinding {
    #[serde(default)]
    text_elements: Vec<ToastText>,
}

#[derive(Debug, Deserialize)]
struct ToastText {
    #[serde(default)]
    text: Option<String>,
}

/// Map a raw toast event into a [`Record`]
///
/// Returns `None` (and logs) when the event does not have the expected shape.
pub fn map_event(event: &RawEvent) -> Option<Record> {
    let toast = match ToastEvent::deserialize(event) {
        Ok(toast) => toast,
        Err(e) => {
            warn!(error = %e, "Unable to map notification");
            return None;
        }
    };

    let (title, body) = extract_text(&toast.notification.visual.bindings);
    let timestamp = toast.creation_time.as_ref().map(Record::format_timestamp);
    let app = toast.app_info.as_ref().and_then(app_display_name);

    debug!(?timestamp, ?app, "map_event: mapped");
    Some(Record::new(timestamp, title, body, app))
}

/// First non-blank text is the title; the next non-blank element at index >= 1
/// of a binding is the body.
fn extract_text(bindings: &[ToastBinding]) -> (Option<String>, Option<String>) {
    let mut title: Option<String> = None;
    let mut body: Option<String> = None;

    for binding in bindings {
        for (index, element) in binding.text_elements.iter().enumerate() {
            let content = element.text.as_deref().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            if title.is_none() {
                title = Some(content.to_string());
                continue;
            }
            if body.is_none() && index >= 1 {
                body = Some(content.to_string());
                break;
            }
        }
        if title.is_some() && body.is_some() {
            break;
        }
    }

    (title, body)
}

fn app_display_name(app_info: &Value) -> Option<String> {
    app_info
        .pointer("/displayInfo/displayName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toast(texts: &[&str]) -> Value {
        let elements: Vec<Value> = texts.iter().map(|t| json!({ "text": t })).collect();
        json!({
            "creationTime": "2024-01-02T09:30:00.250Z",
            "appInfo": { "displayInfo": { "displayName": "  Mail  " } },
            "notification": { "visual": { "bindings": [ { "textElements": elements } ] } }
        })
    }

    #[test]
    fn test_maps_title_body_app_and_timestamp() {
        let record = map_event(&toast(&["New message", "Lunch at noon?"])).unwrap();
        assert_eq!(record.title.as_deref(), Some("New message"));
        assert_eq!(record.body.as_deref(), Some("Lunch at noon?"));
        assert_eq!(record.app.as_deref(), Some("Mail"));
        assert_eq!(record.timestamp.as_deref(), Some("2024-01-02T09:30:00.250000Z"));
    }

    #[test]
    fn test_blank_texts_are_skipped() {
        let record = map_event(&toast(&["   ", "Title", "", "Body", "Ignored"])).unwrap();
        assert_eq!(record.title.as_deref(), Some("Title"));
        assert_eq!(record.body.as_deref(), Some("Body"));
    }

    #[test]
    fn test_title_only() {
        let record = map_event(&toast(&["Only a title"])).unwrap();
        assert_eq!(record.title.as_deref(), Some("Only a title"));
        assert_eq!(record.body, None);
    }

    #[test]
    fn test_body_comes_from_later_binding() {
        let event = json!({
            "notification": { "visual": { "bindings": [
                { "textElements": [ { "text": "Title" } ] },
                { "textElements": [ { "text": "Skipped at index zero" }, { "text": "Body" } ] }
            ] } }
        });
        let record = map_event(&event).unwrap();
        assert_eq!(record.title.as_deref(), Some("Title"));
        assert_eq!(record.body.as_deref(), Some("Body"));
    }

    #[test]
    fn test_missing_app_and_time_are_not_failures() {
        let event = json!({
            "notification": { "visual": { "bindings": [ { "textElements": [ { "text": "Hi" } ] } ] } }
        });
        let record = map_event(&event).unwrap();
        assert_eq!(record.timestamp, None);
        assert_eq!(record.app, None);
    }

    #[test]
    fn test_blank_app_name_is_none() {
        let mut event = toast(&["Hi"]);
        event["appInfo"] = json!({ "displayInfo": { "displayName": "   " } });
        assert_eq!(map_event(&event).unwrap().app, None);
    }

    #[test]
    fn test_missing_visual_is_unmappable() {
        let event = json!({ "creationTime": "2024-01-02T09:30:00Z", "notification": {} });
        assert!(map_event(&event).is_none());
    }

    #[test]
    fn test_bad_creation_time_is_unmappable() {
        let mut event = toast(&["Hi"]);
        event["creationTime"] = json!("yesterday");
        assert!(map_event(&event).is_none());
    }

    #[test]
    fn test_non_object_is_unmappable() {
        assert!(map_event(&json!("just a string")).is_none());
        assert!(map_event(&json!(42)).is_none());
    }
}
