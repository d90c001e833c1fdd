use std::collections::BTreeMap;

use bytes::Bytes;

use crate::types::EventId;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Blob {
        content_type: Option<String>,
        data: Bytes,
    },
    /// A `Content-Disposition: attachment` response.
    Attachment {
        filename: String,
        content_type: Option<String>,
        data: Bytes,
    },
}

impl ResponseBody {
    /// JSON view handed to sub-handlers and state patches. Binary payloads
    /// are summarised rather than inlined.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Empty => serde_json::Value::Null,
            Self::Json(v) => v.clone(),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Blob { content_type, data } => serde_json::json!({
                "blob": {"size": data.len(), "contentType": content_type},
            }),
            Self::Attachment {
                filename,
                content_type,
                data,
            } => serde_json::json!({
                "blob": {"size": data.len(), "contentType": content_type},
                "filename": filename,
            }),
        }
    }
}

/// Response returned by the request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    /// Served from the offline cache instead of the network.
    pub from_cache: bool,
    /// Set when the request was queued for offline replay.
    pub queued: Option<EventId>,
}

impl ApiResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            from_cache: false,
            queued: None,
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, ResponseBody::Json(value))
    }

    /// Placeholder response for a mutation that was queued while offline.
    pub fn queued(event_id: EventId) -> Self {
        let body = ResponseBody::Json(serde_json::json!({
            "queued": true,
            "eventId": event_id.as_str(),
        }));
        Self {
            status: 202,
            headers: BTreeMap::new(),
            body,
            from_cache: false,
            queued: Some(event_id),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn value(&self) -> serde_json::Value {
        self.body.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_value_exposes_filename() {
        let body = ResponseBody::Attachment {
            filename: "report.csv".into(),
            content_type: Some("text/csv".into()),
            data: Bytes::from_static(b"a,b\n1,2\n"),
        };
        let value = body.to_value();
        assert_eq!(value["filename"], "report.csv");
        assert_eq!(value["blob"]["size"], 8);
    }

    #[test]
    fn queued_response_is_accepted() {
        let resp = ApiResponse::queued(EventId::new("e1"));
        assert_eq!(resp.status, 202);
        assert!(resp.is_success());
        assert_eq!(resp.value()["queued"], true);
    }
}
