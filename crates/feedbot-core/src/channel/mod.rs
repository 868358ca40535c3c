pub mod line;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Outbound side of a messaging platform.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "line").
    fn name(&self) -> &str;

    /// Answer an inbound event through its single-use reply token.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError>;
}

/// Check if a sender is allowed based on the allow list.
pub fn is_allowed(sender_id: &str, allow_from: &[String]) -> bool {
    allow_from.is_empty() || allow_from.iter().any(|id| id == sender_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allow_list_allows_everyone() {
        assert!(is_allowed("U123", &[]));
    }

    #[test]
    fn test_allow_list_filters() {
        let allow = vec!["U1".to_string(), "U2".to_string()];
        assert!(is_allowed("U2", &allow));
        assert!(!is_allowed("U3", &allow));
    }
}
