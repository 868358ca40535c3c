//! User-facing reply texts.

pub const WRITE_PROMPT: &str = "請直接輸入：\n教授名稱 課程名稱\n你的評價";
pub const WRITE_FORMAT_ERROR: &str =
    "格式不正確，請依照以下格式輸入（或輸入 /cancel 取消）：\n教授名稱 課程名稱\n你的評價";
pub const READ_PROMPT: &str = "請輸入教授名稱與課程名稱（例如：帶至華 作業系統）：";
pub const CANCELLED: &str = "已取消。";
pub const HELP: &str = "請輸入 /write 來填寫課程評價，或 /read 查詢課程評價";
pub const CHAT_WELCOME: &str = "你好！直接輸入訊息即可與我聊天，輸入 /delete 可清除對話記錄。";

pub const HISTORY_DELETED: &str = "對話記錄已成功刪除。";
pub const HISTORY_DELETE_FAILED: &str = "刪除對話記錄時發生錯誤，請稍後再試。";
pub const NO_ANSWER: &str = "抱歉，我無法回答這個問題。";
pub const RETRY_LATER: &str = "抱歉，目前服務暫時無法使用，請稍後再試。";

pub fn feedback_saved(course_key: &str) -> String {
    format!("✅ 成功寫入「{course_key}」的評價，感謝你的回饋！")
}

pub fn feedback_list(course_key: &str, entries: &[String]) -> String {
    let lines: Vec<String> = entries.iter().map(|e| format!("- {e}")).collect();
    format!("【{course_key}】課程評價：\n{}", lines.join("\n"))
}

pub fn no_feedback_yet(course_key: &str) -> String {
    format!("「{course_key}」目前沒有任何評價。")
}

pub fn no_record(course_key: &str) -> String {
    format!("查無「{course_key}」的課程紀錄。")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_list_keeps_entries_verbatim() {
        let entries = vec!["很好, 推".to_string(), "作業多\n但值得".to_string()];
        assert_eq!(
            feedback_list("帶至華 作業系統", &entries),
            "【帶至華 作業系統】課程評價：\n- 很好, 推\n- 作業多\n但值得"
        );
    }

    #[test]
    fn test_write_prompt_names_format() {
        assert!(WRITE_PROMPT.contains("教授名稱 課程名稱"));
        assert!(WRITE_FORMAT_ERROR.contains("/cancel"));
    }
}
