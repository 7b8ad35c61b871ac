//! Pure snapshot payload parser (§4.6).
//!
//! Deliberately reads `serde_json::Value` rather than deriving a single
//! rigid `Deserialize` struct over the whole payload: the backend's field
//! naming is authoritative and inconsistent (snake_case and camelCase are
//! both observed), so every field is probed under both spellings, the
//! design note this module is grounded on ("`any`-typed payload parsing",
//! `SPEC_FULL.md` §9).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{SignageError, SignageResult};
use crate::utils::now_millis;

use super::types::{Fit, MediaType, NormalizedSnapshot, TimelineItem};

fn get<'a>(obj: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    obj.get(snake).or_else(|| obj.get(camel))
}

fn as_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_u64)
}

fn as_bool(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn infer_media_type(explicit: Option<&str>, url: Option<&str>) -> MediaType {
    if let Some(t) = explicit {
        return match t.to_lowercase().as_str() {
            "video" => MediaType::Video,
            "pdf" => MediaType::Pdf,
            "url" => MediaType::Url,
            _ => MediaType::Image,
        };
    }
    let lowered = url.unwrap_or_default().to_lowercase();
    if [".mp4", ".webm", ".mov", ".m4v"]
        .iter()
        .any(|ext| lowered.ends_with(ext))
    {
        MediaType::Video
    } else if lowered.ends_with(".pdf") {
        MediaType::Pdf
    } else {
        MediaType::Image
    }
}

fn parse_item(obj: &Value, fallback_id: &str) -> TimelineItem {
    let id = as_str(get(obj, "id", "id")).unwrap_or_else(|| fallback_id.to_string());
    let media_id = as_str(get(obj, "media_id", "mediaId"));
    let remote_url = as_str(get(obj, "url", "remoteUrl")).or_else(|| as_str(get(obj, "media_url", "mediaUrl")));
    let explicit_type = as_str(get(obj, "type", "type"));
    let media_type = infer_media_type(explicit_type.as_deref(), remote_url.as_deref());
    let display_ms = TimelineItem::normalize_display_ms(as_u64(get(obj, "display_ms", "displayMs")));
    let fit = Fit::parse(as_str(get(obj, "fit", "fit")).as_deref());
    let muted = as_bool(get(obj, "muted", "muted"));
    let sha256 = as_str(get(obj, "sha256", "sha256"));
    let transition_duration_ms = as_u64(get(obj, "transition_duration_ms", "transitionDurationMs")).unwrap_or(0);
    let meta = get(obj, "meta", "meta").cloned().unwrap_or(Value::Null);

    TimelineItem {
        id,
        media_id,
        media_type,
        remote_url,
        local_path: None,
        local_url: None,
        display_ms,
        fit,
        muted,
        sha256,
        transition_duration_ms,
        meta,
    }
}

/// Parses a raw backend snapshot payload into a [`NormalizedSnapshot`].
///
/// Fails with [`SignageError::Parse`] only when the payload is not a JSON
/// object, matching §4.6's stated failure condition.
pub fn parse_snapshot_response(raw: Value) -> SignageResult<NormalizedSnapshot> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SignageError::Parse("snapshot payload is not an object".to_string()))?;
    let root = Value::Object(obj.clone());

    let snapshot_id = as_str(get(&root, "snapshot_id", "snapshotId"));

    // The backend nests the schedule's id/items one level down under a
    // `schedule` object (`{schedule: {id, items}}`); fall back to the
    // top-level fields for payloads that don't nest it.
    let schedule_obj = get(&root, "schedule", "schedule").cloned();
    let schedule_id = schedule_obj
        .as_ref()
        .and_then(|s| as_str(get(s, "id", "id")))
        .or_else(|| as_str(get(&root, "schedule_id", "scheduleId")));

    let items_source = schedule_obj
        .as_ref()
        .and_then(|s| get(s, "items", "items").cloned())
        .or_else(|| get(&root, "items", "items").cloned());

    let items: Vec<TimelineItem> = items_source
        .as_ref()
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, item)| parse_item(item, &format!("item-{i}")))
                .collect()
        })
        .unwrap_or_default();

    let emergency_obj = get(&root, "emergency", "emergency");
    let emergency_item = emergency_obj.and_then(|e| {
        let active = as_bool(get(e, "active", "active"));
        let has_url = as_str(get(e, "url", "remoteUrl")).is_some();
        if active || has_url {
            Some(parse_item(e, "emergency"))
        } else {
            None
        }
    });

    let default_obj = get(&root, "default_media", "defaultMedia").or_else(|| get(&root, "default", "default"));
    let default_item = default_obj.map(|d| parse_item(d, "default"));

    let mut media_url_map: HashMap<String, String> = HashMap::new();
    if let Some(map) = get(&root, "media_urls", "mediaUrls").and_then(Value::as_object) {
        for (k, v) in map {
            if let Some(url) = v.as_str() {
                media_url_map.insert(k.clone(), url.to_string());
            }
        }
    }
    if let Some(media_list) = get(&root, "media", "media").and_then(Value::as_array) {
        for entry in media_list {
            if let (Some(id), Some(url)) = (
                as_str(get(entry, "id", "id")),
                as_str(get(entry, "url", "url")).or_else(|| as_str(get(entry, "media_url", "mediaUrl"))),
            ) {
                media_url_map.entry(id).or_insert(url);
            }
        }
    }

    Ok(NormalizedSnapshot {
        snapshot_id,
        schedule_id,
        items,
        emergency_item,
        default_item,
        media_url_map,
        fetched_at: now_millis(),
        raw: root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_object_payload() {
        let err = parse_snapshot_response(json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn parses_snake_case_and_camel_case_items() {
        let raw = json!({
            "schedule_id": "sched-1",
            "items": [
                {"id": "a", "media_id": "m1", "url": "https://x/a.mp4"},
                {"id": "b", "mediaId": "m2", "remoteUrl": "https://x/b.jpg", "displayMs": 5000},
            ]
        });
        let snap = parse_snapshot_response(raw).unwrap();
        assert_eq!(snap.schedule_id.as_deref(), Some("sched-1"));
        assert_eq!(snap.items.len(), 2);
        assert_eq!(snap.items[0].media_type, MediaType::Video);
        assert_eq!(snap.items[1].display_ms, 5000);
    }

    #[test]
    fn parses_schedule_nested_id_and_items() {
        let raw = json!({
            "schedule": {
                "id": "s1",
                "items": [
                    {"id": "i1", "media_id": "m1", "media_url": "https://u/1.png", "display_ms": 5000},
                    {"id": "i2", "media_id": "m2", "media_url": "https://u/2.mp4"},
                ]
            }
        });
        let snap = parse_snapshot_response(raw).unwrap();
        assert_eq!(snap.schedule_id.as_deref(), Some("s1"));
        assert_eq!(snap.items.len(), 2);
        assert_eq!(snap.items[1].media_type, MediaType::Video);
        assert_eq!(snap.items[1].display_ms, 10_000);
    }

    #[test]
    fn zero_or_missing_display_ms_defaults_to_ten_seconds() {
        let raw = json!({"items": [{"id": "a", "displayMs": 0}, {"id": "b"}]});
        let snap = parse_snapshot_response(raw).unwrap();
        assert_eq!(snap.items[0].display_ms, 10_000);
        assert_eq!(snap.items[1].display_ms, 10_000);
    }

    #[test]
    fn emergency_item_requires_active_flag_or_url() {
        let raw = json!({"items": [], "emergency": {"active": false}});
        let snap = parse_snapshot_response(raw).unwrap();
        assert!(snap.emergency_item.is_none());

        let raw = json!({"items": [], "emergency": {"active": true, "url": "https://x/e.jpg"}});
        let snap = parse_snapshot_response(raw).unwrap();
        assert!(snap.emergency_item.is_some());
    }

    #[test]
    fn infers_media_type_from_extension_when_type_absent() {
        let raw = json!({"items": [
            {"id": "a", "url": "https://x/a.pdf"},
            {"id": "b", "url": "https://x/b.webm"},
            {"id": "c", "url": "https://x/c.png"},
        ]});
        let snap = parse_snapshot_response(raw).unwrap();
        assert_eq!(snap.items[0].media_type, MediaType::Pdf);
        assert_eq!(snap.items[1].media_type, MediaType::Video);
        assert_eq!(snap.items[2].media_type, MediaType::Image);
    }

    #[test]
    fn parsing_is_idempotent_under_serialize_roundtrip() {
        let raw = json!({"schedule_id": "s1", "items": [{"id": "a", "mediaId": "m1"}]});
        let first = parse_snapshot_response(raw.clone()).unwrap();
        let reparsed = parse_snapshot_response(first.raw.clone()).unwrap();
        assert_eq!(first.schedule_id, reparsed.schedule_id);
        assert_eq!(first.items.len(), reparsed.items.len());
    }
}
