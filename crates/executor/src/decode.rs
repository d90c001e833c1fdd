use percent_encoding::percent_decode_str;

use weft_core::{ResponseBody, ResponseType};

use crate::transport::TransportResponse;

const DEFAULT_ATTACHMENT_NAME: &str = "download";

/// Decode a response body by content negotiation.
///
/// `Content-Disposition: attachment` always yields
/// [`ResponseBody::Attachment`]. Otherwise `expected` wins when given, and
/// the content type decides when not: JSON types parse as JSON (falling back
/// to text when the payload is not valid JSON), `text/*`, XML and
/// JavaScript as text, anything else as a blob.
pub fn decode_response(
    response: &TransportResponse,
    expected: Option<ResponseType>,
) -> ResponseBody {
    let content_type = response.header("content-type").map(str::to_owned);

    if let Some(disposition) = response.header("content-disposition") {
        if disposition.trim_start().to_ascii_lowercase().starts_with("attachment") {
            return ResponseBody::Attachment {
                filename: attachment_filename(disposition)
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_owned()),
                content_type,
                data: response.body.clone(),
            };
        }
    }

    if response.body.is_empty() && expected != Some(ResponseType::Blob) {
        return ResponseBody::Empty;
    }

    let mime = content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();

    let kind = expected.unwrap_or_else(|| {
        if mime == "application/json" || mime.ends_with("+json") {
            ResponseType::Json
        } else if mime.starts_with("text/")
            || mime.contains("xml")
            || mime.contains("javascript")
            || mime.is_empty()
        {
            ResponseType::Text
        } else {
            ResponseType::Blob
        }
    });

    match kind {
        ResponseType::Json => match serde_json::from_slice(&response.body) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(String::from_utf8_lossy(&response.body).into_owned()),
        },
        ResponseType::Text => {
            // Untyped bodies that happen to be JSON are still useful as JSON.
            if mime.is_empty() {
                if let Ok(value) = serde_json::from_slice(&response.body) {
                    return ResponseBody::Json(value);
                }
            }
            ResponseBody::Text(String::from_utf8_lossy(&response.body).into_owned())
        }
        ResponseType::Blob => ResponseBody::Blob {
            content_type,
            data: response.body.clone(),
        },
    }
}

/// Filename from a `Content-Disposition` header. `filename*` (RFC 5987)
/// takes precedence over `filename`.
pub fn attachment_filename(disposition: &str) -> Option<String> {
    let mut plain = None;
    for param in disposition.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "filename*" {
            // charset'lang'percent-encoded
            let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
            let decoded = percent_decode_str(encoded).decode_utf8_lossy().into_owned();
            if !decoded.is_empty() {
                return Some(decoded);
            }
        } else if key == "filename" {
            let unquoted = value.trim_matches('"');
            if !unquoted.is_empty() {
                plain = Some(unquoted.to_owned());
            }
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_by_content_type() {
        let resp = TransportResponse::new(200, r#"{"a":1}"#)
            .with_header("Content-Type", "application/json; charset=utf-8");
        assert_eq!(decode_response(&resp, None), ResponseBody::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn invalid_json_falls_back_to_text() {
        let resp =
            TransportResponse::new(200, "oops").with_header("content-type", "application/json");
        assert_eq!(decode_response(&resp, None), ResponseBody::Text("oops".into()));
    }

    #[test]
    fn text_and_blob() {
        let resp = TransportResponse::new(200, "hello").with_header("content-type", "text/plain");
        assert_eq!(decode_response(&resp, None), ResponseBody::Text("hello".into()));

        let resp = TransportResponse::new(200, vec![0u8, 1, 2])
            .with_header("content-type", "image/png");
        assert!(matches!(decode_response(&resp, None), ResponseBody::Blob { .. }));
    }

    #[test]
    fn expected_type_overrides_content_type() {
        let resp =
            TransportResponse::new(200, r#"{"a":1}"#).with_header("content-type", "text/plain");
        assert!(matches!(
            decode_response(&resp, Some(ResponseType::Json)),
            ResponseBody::Json(_)
        ));
        assert!(matches!(
            decode_response(&resp, Some(ResponseType::Blob)),
            ResponseBody::Blob { .. }
        ));
    }

    #[test]
    fn attachment_is_special_cased() {
        let resp = TransportResponse::new(200, "a,b\n")
            .with_header("content-type", "text/csv")
            .with_header("content-disposition", "attachment; filename=\"report.csv\"");
        match decode_response(&resp, Some(ResponseType::Json)) {
            ResponseBody::Attachment { filename, data, .. } => {
                assert_eq!(filename, "report.csv");
                assert_eq!(&data[..], b"a,b\n");
            }
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[test]
    fn filename_parsing() {
        assert_eq!(
            attachment_filename(
                "attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf; filename=\"resume.pdf\""
            ),
            Some("résumé.pdf".into())
        );
        assert_eq!(attachment_filename("attachment; filename=plain.txt"), Some("plain.txt".into()));
        assert_eq!(attachment_filename("attachment"), None);
    }

    #[test]
    fn empty_body() {
        let resp = TransportResponse::new(204, "");
        assert_eq!(decode_response(&resp, None), ResponseBody::Empty);
    }
}
