use crate::types::ChatEntry;

pub fn is_delete_command(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("/delete")
}

/// Prompt for one chat turn. With no history the message goes out as is.
pub fn build_prompt(history: &[ChatEntry], message: &str) -> String {
    if history.is_empty() {
        return message.to_string();
    }
    let transcript = serde_json::to_string(history).unwrap_or_else(|_| "[]".to_string());
    format!("之前的歷史對話為{transcript}，請根據歷史對話，回答{message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_command_is_case_insensitive() {
        assert!(is_delete_command("/delete"));
        assert!(is_delete_command(" /DELETE\n"));
        assert!(!is_delete_command("/delete all"));
    }

    #[test]
    fn test_first_turn_is_verbatim() {
        assert_eq!(build_prompt(&[], "你好"), "你好");
    }

    #[test]
    fn test_prompt_embeds_transcript() {
        let history = vec![ChatEntry::user("你好"), ChatEntry::assistant("嗨")];
        assert_eq!(
            build_prompt(&history, "今天星期幾"),
            "之前的歷史對話為[{\"role\":\"user\",\"content\":\"你好\"},{\"role\":\"assistant\",\"content\":\"嗨\"}]，請根據歷史對話，回答今天星期幾"
        );
    }
}
