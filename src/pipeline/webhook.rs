//! Webhook normalisation: turns provider-shaped payloads into [`InboundMessage`].
//!
//! Each channel accepts two payload shapes. The shape is detected by key
//! presence, in a fixed order per channel:
//!
//! | Channel | First checked | Then |
//! |---|---|---|
//! | SMS/MMS | unified (`from`) | provider-native (`From`) |
//! | Email | provider-native (`from_email`) | unified (`from`) |
//!
//! Normalisation is pure apart from reading the injected clock when the
//! payload carries no timestamp.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mockable::Clock;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::pipeline::types::{InboundMessage, ProviderType};

type Payload = Map<String, Value>;

/// Inbound channel a webhook arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookChannel {
    SmsMms,
    Email,
}

impl WebhookChannel {
    /// Normalise `payload` according to this channel's accepted shapes.
    pub fn normalize(
        self,
        payload: &Value,
        clock: &dyn Clock,
    ) -> Result<InboundMessage, ValidationError> {
        match self {
            Self::SmsMms => normalize_sms_mms(payload, clock),
            Self::Email => normalize_email(payload, clock),
        }
    }
}

/// Where each canonical field lives in one payload shape.
struct FieldMap {
    from: &'static str,
    to: &'static str,
    body: &'static str,
    message_id: &'static str,
    attachments: Option<&'static str>,
    timestamp: &'static str,
}

const SMS_UNIFIED: FieldMap = FieldMap {
    from: "from",
    to: "to",
    body: "body",
    message_id: "messaging_provider_id",
    attachments: Some("attachments"),
    timestamp: "timestamp",
};

const SMS_PROVIDER: FieldMap = FieldMap {
    from: "From",
    to: "To",
    body: "Body",
    message_id: "MessageSid",
    attachments: Some("MediaUrl"),
    timestamp: "Timestamp",
};

const EMAIL_PROVIDER: FieldMap = FieldMap {
    from: "from_email",
    to: "to_email",
    body: "content",
    message_id: "x_message_id",
    attachments: None,
    timestamp: "timestamp",
};

const EMAIL_UNIFIED: FieldMap = FieldMap {
    from: "from",
    to: "to",
    body: "body",
    message_id: "xillio_id",
    attachments: Some("attachments"),
    timestamp: "timestamp",
};

/// Fields every shape must yield, after extraction.
struct Extracted {
    from_address: String,
    to_address: String,
    body: String,
    provider_message_id: String,
    attachments: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl Extracted {
    fn into_message(self, provider_type: ProviderType) -> InboundMessage {
        InboundMessage {
            from_address: self.from_address,
            to_address: self.to_address,
            body: self.body,
            attachments: self.attachments,
            provider_message_id: self.provider_message_id,
            timestamp: self.timestamp,
            provider_type,
        }
    }
}

// ── SMS / MMS ───────────────────────────────────────────────────────

/// Normalise an SMS/MMS webhook.
///
/// Unified payloads must name their `type` (`sms` or `mms`); provider-native
/// payloads are `mms` when `MediaUrl` is non-empty and `sms` otherwise.
pub fn normalize_sms_mms(
    payload: &Value,
    clock: &dyn Clock,
) -> Result<InboundMessage, ValidationError> {
    let map = as_object(payload)?;

    if map.contains_key(SMS_UNIFIED.from) {
        let body = text(map, SMS_UNIFIED.body)?;
        let fields = extract(map, &SMS_UNIFIED, body, clock)?;

        let raw_type = text(map, "type")?;
        let provider_type = match raw_type.as_str() {
            "sms" => ProviderType::Sms,
            "mms" => ProviderType::Mms,
            _ => return Err(ValidationError::InvalidProviderType(raw_type)),
        };
        Ok(fields.into_message(provider_type))
    } else if map.contains_key(SMS_PROVIDER.from) {
        let body = text(map, SMS_PROVIDER.body)?;
        let fields = extract(map, &SMS_PROVIDER, body, clock)?;

        let provider_type = if fields.attachments.is_empty() {
            ProviderType::Sms
        } else {
            ProviderType::Mms
        };
        Ok(fields.into_message(provider_type))
    } else {
        Err(ValidationError::UnrecognizedFormat)
    }
}

// ── Email ───────────────────────────────────────────────────────────

/// Normalise an email webhook.
///
/// Provider-native bodies prefer `html_content` over `content` and carry the
/// subject as a `Subject: ...` prefix. Both addresses must contain `@`.
pub fn normalize_email(
    payload: &Value,
    clock: &dyn Clock,
) -> Result<InboundMessage, ValidationError> {
    let map = as_object(payload)?;

    let fields = if map.contains_key(EMAIL_PROVIDER.from) {
        let body = email_provider_body(map)?;
        extract(map, &EMAIL_PROVIDER, body, clock)?
    } else if map.contains_key(EMAIL_UNIFIED.from) {
        let body = text(map, EMAIL_UNIFIED.body)?;
        extract(map, &EMAIL_UNIFIED, body, clock)?
    } else {
        return Err(ValidationError::UnrecognizedFormat);
    };

    check_email_address("from_address", &fields.from_address)?;
    check_email_address("to_address", &fields.to_address)?;

    Ok(fields.into_message(ProviderType::Email))
}

fn email_provider_body(map: &Payload) -> Result<String, ValidationError> {
    let subject = text(map, "subject")?;
    let html = text(map, "html_content")?;
    let content = if html.is_empty() {
        text(map, EMAIL_PROVIDER.body)?
    } else {
        html
    };

    if subject.is_empty() {
        Ok(content)
    } else {
        Ok(format!("Subject: {subject}\n\n{content}"))
    }
}

fn check_email_address(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.contains('@') {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddressFormat {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}

// ── Extraction helpers ──────────────────────────────────────────────

fn as_object(payload: &Value) -> Result<&Payload, ValidationError> {
    payload.as_object().ok_or_else(|| {
        ValidationError::MalformedPayload("webhook payload must be a JSON object".to_string())
    })
}

/// Pull the shared fields out of `map`. `body` is pre-built by the caller
/// since its construction differs per shape.
fn extract(
    map: &Payload,
    fields: &FieldMap,
    body: String,
    clock: &dyn Clock,
) -> Result<Extracted, ValidationError> {
    let from_address = required(text(map, fields.from)?, "from_address")?;
    let to_address = required(text(map, fields.to)?, "to_address")?;
    let body = required(body, "body")?;
    let provider_message_id = required(text(map, fields.message_id)?, "provider_message_id")?;

    let attachments = match fields.attachments {
        Some(key) => string_list(map, key)?,
        None => Vec::new(),
    };
    let timestamp = timestamp(map, fields.timestamp, clock)?;

    Ok(Extracted {
        from_address,
        to_address,
        body,
        provider_message_id,
        attachments,
        timestamp,
    })
}

/// Scalar field as text. Missing and `null` read as empty.
fn text(map: &Payload, key: &str) -> Result<String, ValidationError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(_) => Err(ValidationError::MalformedPayload(format!(
            "field `{key}` must be a string"
        ))),
    }
}

fn required(value: String, name: &str) -> Result<String, ValidationError> {
    if value.is_empty() {
        Err(ValidationError::MissingField(name.to_string()))
    } else {
        Ok(value)
    }
}

/// List of URLs. Missing and `null` read as an empty list.
fn string_list(map: &Payload, key: &str) -> Result<Vec<String>, ValidationError> {
    let malformed =
        || ValidationError::MalformedPayload(format!("field `{key}` must be a list of strings"));

    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(malformed))
            .collect(),
        Some(_) => Err(malformed()),
    }
}

fn timestamp(
    map: &Payload,
    key: &str,
    clock: &dyn Clock,
) -> Result<DateTime<Utc>, ValidationError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(clock.utc()),
        Some(Value::String(s)) if s.is_empty() => Ok(clock.utc()),
        Some(Value::String(s)) => parse_iso8601(s),
        Some(other) => Err(ValidationError::InvalidTimestamp(other.to_string())),
    }
}

/// Parse an ISO-8601 timestamp. A `Z` suffix means UTC; timestamps without
/// an offset are taken as UTC.
pub fn parse_iso8601(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let s = raw.trim().replace('Z', "+00:00");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(ndt.and_utc());
        }
    }

    Err(ValidationError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::testing::FixedClock;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2030, 5, 6, 7, 8, 9).unwrap())
    }

    fn sms(payload: Value) -> Result<InboundMessage, ValidationError> {
        normalize_sms_mms(&payload, &clock())
    }

    fn email(payload: Value) -> Result<InboundMessage, ValidationError> {
        normalize_email(&payload, &clock())
    }

    // ── SMS / MMS ───────────────────────────────────────────────────

    #[test]
    fn sms_unified_shape() {
        let msg = sms(json!({
            "from": "+1", "to": "+2", "body": "hi",
            "messaging_provider_id": "m1", "type": "sms",
            "attachments": [], "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.provider_type, ProviderType::Sms);
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.provider_message_id, "m1");
        assert_eq!(msg.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn sms_provider_shape_with_media_is_mms() {
        let msg = sms(json!({
            "From": "+1", "To": "+2", "Body": "hi",
            "MessageSid": "SM1", "MediaUrl": ["http://x/img.jpg"]
        }))
        .unwrap();

        assert_eq!(msg.provider_type, ProviderType::Mms);
        assert_eq!(msg.attachments, vec!["http://x/img.jpg"]);
        assert_eq!(msg.provider_message_id, "SM1");
    }

    #[test]
    fn sms_provider_shape_without_media_is_sms() {
        let msg = sms(json!({
            "From": "+1", "To": "+2", "Body": "hi", "MessageSid": "SM2", "MediaUrl": null
        }))
        .unwrap();
        assert_eq!(msg.provider_type, ProviderType::Sms);
    }

    #[test]
    fn unified_key_wins_over_provider_key() {
        let msg = sms(json!({
            "from": "+1", "to": "+2", "body": "unified", "messaging_provider_id": "u1",
            "type": "sms", "From": "+9", "Body": "native", "MessageSid": "n1"
        }))
        .unwrap();
        assert_eq!(msg.body, "unified");
        assert_eq!(msg.from_address, "+1");
    }

    #[test]
    fn missing_timestamp_uses_clock() {
        let msg = sms(json!({
            "From": "+1", "To": "+2", "Body": "hi", "MessageSid": "SM3"
        }))
        .unwrap();
        assert_eq!(msg.timestamp, clock().0);
    }

    #[test]
    fn rejects_unrecognized_shape() {
        assert_eq!(sms(json!({"foo": "bar"})).unwrap_err(), ValidationError::UnrecognizedFormat);
        assert_eq!(email(json!({"foo": "bar"})).unwrap_err(), ValidationError::UnrecognizedFormat);
    }

    #[test]
    fn rejects_non_object() {
        let err = sms(json!(["from", "+1"])).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload(_)));
    }

    #[test]
    fn missing_body_is_named() {
        let err = sms(json!({
            "from": "+1", "to": "+2", "messaging_provider_id": "m1", "type": "sms"
        }))
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("body".into()));
    }

    #[test]
    fn missing_fields_checked_in_order() {
        let err = sms(json!({"from": "", "to": "", "body": ""})).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("from_address".into()));

        let err = sms(json!({"From": "+1", "To": "+2", "Body": "hi"})).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("provider_message_id".into()));
    }

    #[test]
    fn unified_sms_requires_valid_type() {
        let base = |ty: Value| {
            json!({
                "from": "+1", "to": "+2", "body": "hi",
                "messaging_provider_id": "m1", "type": ty
            })
        };
        assert_eq!(
            sms(base(json!("fax"))).unwrap_err(),
            ValidationError::InvalidProviderType("fax".into())
        );
        assert_eq!(
            sms(base(Value::Null)).unwrap_err(),
            ValidationError::InvalidProviderType(String::new())
        );
        assert_eq!(sms(base(json!("mms"))).unwrap().provider_type, ProviderType::Mms);
    }

    #[test]
    fn invalid_timestamp_rejected() {
        let err = sms(json!({
            "from": "+1", "to": "+2", "body": "hi", "messaging_provider_id": "m1",
            "type": "sms", "timestamp": "not-a-date"
        }))
        .unwrap_err();
        assert_eq!(err, ValidationError::InvalidTimestamp("not-a-date".into()));
    }

    #[test]
    fn attachments_must_be_strings() {
        let err = sms(json!({
            "From": "+1", "To": "+2", "Body": "hi", "MessageSid": "S", "MediaUrl": [1, 2]
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload(_)));
    }

    // ── Email ───────────────────────────────────────────────────────

    #[test]
    fn email_provider_shape_prefers_html_and_prefixes_subject() {
        let msg = email(json!({
            "from_email": "a@x.com", "to_email": "b@x.com", "subject": "Hello",
            "content": "plain", "html_content": "<p>rich</p>", "x_message_id": "x1"
        }))
        .unwrap();

        assert_eq!(msg.provider_type, ProviderType::Email);
        assert_eq!(msg.body, "Subject: Hello\n\n<p>rich</p>");
        assert_eq!(msg.provider_message_id, "x1");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn email_provider_shape_falls_back_to_plain_content() {
        let msg = email(json!({
            "from_email": "a@x.com", "to_email": "b@x.com", "subject": "",
            "content": "plain", "html_content": null, "x_message_id": "x2"
        }))
        .unwrap();
        assert_eq!(msg.body, "plain");
    }

    #[test]
    fn email_provider_key_wins_over_unified_key() {
        let msg = email(json!({
            "from_email": "a@x.com", "to_email": "b@x.com", "content": "native",
            "x_message_id": "x3", "from": "c@x.com", "body": "unified", "xillio_id": "u"
        }))
        .unwrap();
        assert_eq!(msg.body, "native");
        assert_eq!(msg.from_address, "a@x.com");
    }

    #[test]
    fn email_unified_shape() {
        let msg = email(json!({
            "from": "a@x.com", "to": "b@x.com", "body": "hello", "xillio_id": "xi-1",
            "attachments": ["http://x/doc.pdf"], "timestamp": "2024-03-04T05:06:07+02:00"
        }))
        .unwrap();

        assert_eq!(msg.provider_type, ProviderType::Email);
        assert_eq!(msg.attachments, vec!["http://x/doc.pdf"]);
        assert_eq!(msg.timestamp, Utc.with_ymd_and_hms(2024, 3, 4, 3, 6, 7).unwrap());
    }

    #[test]
    fn email_addresses_need_at_sign() {
        let err = email(json!({
            "from": "+15551234", "to": "b@x.com", "body": "hello", "xillio_id": "xi-2"
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidAddressFormat {
                field: "from_address".into(),
                value: "+15551234".into()
            }
        );
    }

    // ── Timestamps ──────────────────────────────────────────────────

    #[test]
    fn parses_common_iso_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_iso8601("2024-01-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_iso8601("2024-01-01T12:30:00+00:00").unwrap(), expected);
        assert_eq!(parse_iso8601("2024-01-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_iso8601("2024-01-01T12:30:00.000Z").unwrap(), expected);
        assert_eq!(parse_iso8601("2024-01-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(
            parse_iso8601("2024-01-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_iso8601("yesterday").is_err());
    }
}
