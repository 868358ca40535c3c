use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error};

use crate::channel::Channel;
use crate::config::LineConfig;
use crate::error::ChannelError;
use crate::util::{http::client, truncate_chars};

const LINE_API_BASE: &str = "https://api.line.me";

/// LINE rejects text messages longer than this many characters.
pub const MAX_TEXT_CHARS: usize = 5000;

type HmacSha256 = Hmac<Sha256>;

/// LINE Messaging API channel.
pub struct LineChannel {
    access_token: String,
    api_base: String,
}

impl LineChannel {
    pub fn new(config: &LineConfig) -> Self {
        let base = config
            .api_base
            .clone()
            .unwrap_or_else(|| LINE_API_BASE.to_string());
        Self {
            access_token: config.channel_access_token.clone(),
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Compute the `x-line-signature` value for a request body.
    pub fn sign(channel_secret: &str, body: &[u8]) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes()).ok()?;
        mac.update(body);
        Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Verify webhook signature using HMAC-SHA256.
    pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim())
        else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    /// Parse LINE webhook events from the request body.
    pub fn parse_webhook_events(body: &str) -> Result<Vec<LineEvent>, ChannelError> {
        let webhook: LineWebhook = serde_json::from_str(body)?;
        Ok(webhook.events)
    }
}

#[async_trait]
impl Channel for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    /// Must be called within 1 minute of receiving the webhook.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{
                "type": "text",
                "text": truncate_chars(text, MAX_TEXT_CHARS, "…")
            }]
        });

        let resp = client()
            .post(format!("{}/v2/bot/message/reply", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("LINE reply API error: {} {}", status, text);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ChannelError::Auth(text));
            }
            return Err(ChannelError::Send(format!("LINE reply API error: {status}")));
        }

        debug!("LINE reply sent successfully");
        Ok(())
    }
}

// ====== LINE Webhook Types ======

#[derive(Debug, Deserialize)]
pub struct LineWebhook {
    #[serde(default)]
    pub events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reply_token: Option<String>,
    pub source: Option<LineSource>,
    pub message: Option<LineMessage>,
    pub timestamp: Option<u64>,
}

impl LineEvent {
    /// Identifier used to key per-user session state.
    ///
    /// Falls back to the group or room id for sources without a user id.
    pub fn sender_id(&self) -> Option<&str> {
        let source = self.source.as_ref()?;
        source
            .user_id
            .as_deref()
            .or(source.group_id.as_deref())
            .or(source.room_id.as_deref())
    }

    /// Text of a text message event.
    pub fn text(&self) -> Option<&str> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.msg_type != "text" {
            return None;
        }
        message.text.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMessage {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webhook_text_message() {
        let body = r#"{
            "destination": "Ubot",
            "events": [{
                "type": "message",
                "replyToken": "token123",
                "source": {
                    "type": "user",
                    "userId": "U1234567890"
                },
                "message": {
                    "id": "msg001",
                    "type": "text",
                    "text": "/write"
                },
                "timestamp": 1625000000000
            }]
        }"#;

        let events = LineChannel::parse_webhook_events(body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "message");
        assert_eq!(events[0].reply_token.as_deref(), Some("token123"));
        assert_eq!(events[0].sender_id(), Some("U1234567890"));
        assert_eq!(events[0].text(), Some("/write"));
    }

    #[test]
    fn test_parse_webhook_follow_event() {
        let body = r#"{
            "events": [{
                "type": "follow",
                "replyToken": "r1",
                "source": {
                    "type": "user",
                    "userId": "U9999"
                },
                "timestamp": 1625000001000
            }]
        }"#;

        let events = LineChannel::parse_webhook_events(body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "follow");
        assert!(events[0].text().is_none());
    }

    #[test]
    fn test_parse_webhook_empty() {
        let events = LineChannel::parse_webhook_events(r#"{"events": []}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_webhook_malformed() {
        assert!(matches!(
            LineChannel::parse_webhook_events("not json"),
            Err(ChannelError::Payload(_))
        ));
    }

    #[test]
    fn test_sticker_message_has_no_text() {
        let body = r#"{
            "events": [{
                "type": "message",
                "replyToken": "r2",
                "source": {"type": "user", "userId": "U1"},
                "message": {"id": "m", "type": "sticker"}
            }]
        }"#;
        let events = LineChannel::parse_webhook_events(body).unwrap();
        assert!(events[0].text().is_none());
    }

    #[test]
    fn test_group_source_without_user_falls_back() {
        let body = r#"{
            "events": [{
                "type": "message",
                "replyToken": "reply123",
                "source": {
                    "type": "group",
                    "groupId": "Gxyz"
                },
                "message": {
                    "id": "msg002",
                    "type": "text",
                    "text": "Hi from group"
                }
            }]
        }"#;

        let events = LineChannel::parse_webhook_events(body).unwrap();
        let source = events[0].source.as_ref().unwrap();
        assert_eq!(source.source_type, "group");
        assert_eq!(events[0].sender_id(), Some("Gxyz"));
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"events":[]}"#;
        let signature = LineChannel::sign("channel-secret", body).unwrap();
        assert!(LineChannel::verify_signature("channel-secret", body, &signature));
        assert!(!LineChannel::verify_signature("other-secret", body, &signature));
        assert!(!LineChannel::verify_signature(
            "channel-secret",
            br#"{"events":[{}]}"#,
            &signature
        ));
    }

    #[test]
    fn test_signature_rejects_garbage() {
        assert!(!LineChannel::verify_signature("s", b"{}", ""));
        assert!(!LineChannel::verify_signature("s", b"{}", "%%% not base64"));
    }
}
