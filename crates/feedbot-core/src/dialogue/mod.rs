pub mod chat;
pub mod course;
pub mod replies;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{BotConfig, BotMode};
use crate::provider::LlmProvider;
use crate::repository::{FeedbackRepository, HistoryRepository};
use crate::session::{KeyedLocks, SessionMode, SessionStateStore};
use crate::store::DocumentStore;
use crate::util::preview;

use course::CourseAction;

/// Routes each inbound text message to the flow of the configured bot mode
/// and produces the reply text. Never fails: dependency errors become
/// apology replies.
pub struct Dispatcher {
    mode: BotMode,
    sessions: SessionStateStore,
    locks: KeyedLocks,
    feedback: FeedbackRepository,
    history: HistoryRepository,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl Dispatcher {
    pub fn new(
        config: &BotConfig,
        store: Arc<dyn DocumentStore>,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            mode: config.mode,
            sessions: SessionStateStore::new(),
            locks: KeyedLocks::new(),
            feedback: FeedbackRepository::new(store.clone(), config.feedback_collection.clone()),
            history: HistoryRepository::new(
                store,
                config.history_collection.clone(),
                config.history_document.clone(),
            ),
            provider,
        }
    }

    pub fn mode(&self) -> BotMode {
        self.mode
    }

    pub fn sessions(&self) -> &SessionStateStore {
        &self.sessions
    }

    /// Greeting for a new follower.
    pub fn welcome(&self) -> &'static str {
        match self.mode {
            BotMode::Chat => replies::CHAT_WELCOME,
            BotMode::Course => replies::HELP,
        }
    }

    /// Handle one text message from `user_id` and return the reply.
    pub async fn dispatch(&self, user_id: &str, text: &str) -> String {
        match self.mode {
            BotMode::Course => {
                let _guard = self.locks.lock(user_id).await;
                self.handle_course(user_id, text).await
            }
            BotMode::Chat => {
                // One shared history document, so every chat turn contends on it.
                let _guard = self.locks.lock(self.history.doc_id()).await;
                if chat::is_delete_command(text) {
                    self.reset_history().await
                } else {
                    self.chat_turn(text.trim()).await
                }
            }
        }
    }

    async fn handle_course(&self, user_id: &str, text: &str) -> String {
        let current = self.sessions.get(user_id);
        let action = course::decide(current, text);
        let next = action.next_mode();

        let reply = match &action {
            CourseAction::PromptWrite => replies::WRITE_PROMPT.to_string(),
            CourseAction::RejectWrite => replies::WRITE_FORMAT_ERROR.to_string(),
            CourseAction::PromptRead => replies::READ_PROMPT.to_string(),
            CourseAction::Cancel => replies::CANCELLED.to_string(),
            CourseAction::Help => replies::HELP.to_string(),
            CourseAction::SubmitFeedback {
                course_key,
                feedback,
            } => match self.feedback.append(course_key, feedback).await {
                Ok(entries) => {
                    info!(
                        "Saved feedback for {} ({} total)",
                        course_key,
                        entries.len()
                    );
                    replies::feedback_saved(course_key)
                }
                Err(e) => {
                    error!("Failed to save feedback for {}: {}", course_key, e);
                    return replies::RETRY_LATER.to_string();
                }
            },
            CourseAction::Lookup { course_key } => match self.feedback.read(course_key).await {
                Ok(Some(entries)) if entries.is_empty() => replies::no_feedback_yet(course_key),
                Ok(Some(entries)) => replies::feedback_list(course_key, &entries),
                Ok(None) => replies::no_record(course_key),
                Err(e) => {
                    error!("Failed to read feedback for {}: {}", course_key, e);
                    return replies::RETRY_LATER.to_string();
                }
            },
        };

        if current != next {
            info!("Session {}: {} -> {}", user_id, current, next);
        }
        self.sessions.set(user_id, next);
        reply
    }

    async fn reset_history(&self) -> String {
        match self.history.reset().await {
            Ok(()) => {
                info!("Conversation history cleared");
                replies::HISTORY_DELETED.to_string()
            }
            Err(e) => {
                error!("Failed to clear conversation history: {}", e);
                replies::HISTORY_DELETE_FAILED.to_string()
            }
        }
    }

    async fn chat_turn(&self, message: &str) -> String {
        let Some(provider) = &self.provider else {
            warn!("Chat message received but no model is configured");
            return replies::NO_ANSWER.to_string();
        };

        let history = match self.history.load().await {
            Ok(h) => h,
            Err(e) => {
                error!("Failed to load conversation history: {}", e);
                return replies::RETRY_LATER.to_string();
            }
        };

        let prompt = chat::build_prompt(&history, message);
        let answer = match provider.generate(&prompt).await {
            Ok(completion) => match completion.text() {
                Some(text) => text.to_string(),
                None => {
                    warn!(
                        "Model {} returned no usable text ({:?})",
                        provider.model(),
                        completion.finish_reason
                    );
                    return replies::NO_ANSWER.to_string();
                }
            },
            Err(e) => {
                warn!("Model {} failed: {}", provider.model(), e);
                return replies::NO_ANSWER.to_string();
            }
        };

        if let Err(e) = self.history.append_turn(message, &answer).await {
            error!("Failed to append conversation history: {}", e);
            return replies::RETRY_LATER.to_string();
        }
        info!("Chat reply: {}", preview(&answer));
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, StoreError};
    use crate::store::memory::MemoryStore;
    use crate::store::Document;
    use crate::types::{ChatEntry, Completion, FinishReason, TokenUsage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockProvider {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn answering(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Some(text) => Ok(Completion {
                    content: Some(text.clone()),
                    finish_reason: FinishReason::Stop,
                    usage: TokenUsage::default(),
                }),
                None => Err(ProviderError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                }),
            }
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    /// Memory store whose reads yield to the scheduler first.
    struct SlowStore(MemoryStore);

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn get_document(
            &self,
            collection: &str,
            id: &str,
        ) -> Result<Option<Document>, StoreError> {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.0.get_document(collection, id).await
        }

        async fn set_document(
            &self,
            collection: &str,
            id: &str,
            fields: Document,
            merge: bool,
        ) -> Result<(), StoreError> {
            self.0.set_document(collection, id, fields, merge).await
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn get_document(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            Err(StoreError::Auth("offline".to_string()))
        }

        async fn set_document(
            &self,
            _: &str,
            _: &str,
            _: Document,
            _: bool,
        ) -> Result<(), StoreError> {
            Err(StoreError::Auth("offline".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn bot_config(mode: BotMode) -> BotConfig {
        BotConfig {
            mode,
            ..BotConfig::default()
        }
    }

    fn course_bot() -> (Arc<MemoryStore>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let bot = Dispatcher::new(&bot_config(BotMode::Course), store.clone(), None);
        (store, bot)
    }

    fn chat_bot(provider: Arc<MockProvider>) -> (Arc<MemoryStore>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let bot = Dispatcher::new(&bot_config(BotMode::Chat), store.clone(), Some(provider));
        (store, bot)
    }

    async fn history(store: &MemoryStore) -> serde_json::Value {
        store
            .get_document("feedbacks", "history")
            .await
            .unwrap()
            .map(|d| d["record"].clone())
            .unwrap_or(json!(null))
    }

    #[tokio::test]
    async fn test_write_command_enters_write_pending() {
        let (_, bot) = course_bot();
        let reply = bot.dispatch("U1", "/write").await;
        assert!(reply.contains("教授名稱 課程名稱"));
        assert_eq!(bot.sessions().get("U1"), SessionMode::WritePending);
    }

    #[tokio::test]
    async fn test_write_submission_appends_and_resets() {
        let (store, bot) = course_bot();
        store
            .set_document(
                "feedbacks",
                "帶至華 作業系統",
                json!({"回饋": ["舊評價"]}).as_object().cloned().unwrap(),
                false,
            )
            .await
            .unwrap();

        bot.dispatch("U1", "/write").await;
        let reply = bot.dispatch("U1", "帶至華 作業系統\n這堂課很好").await;

        assert!(reply.contains("帶至華 作業系統"));
        assert_eq!(bot.sessions().get("U1"), SessionMode::None);
        let doc = store
            .get_document("feedbacks", "帶至華 作業系統")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["回饋"], json!(["舊評價", "這堂課很好"]));
    }

    #[tokio::test]
    async fn test_malformed_write_stays_pending_until_cancel() {
        let (store, bot) = course_bot();
        bot.dispatch("U1", "/write").await;

        let reply = bot.dispatch("U1", "只有一行").await;
        assert_eq!(reply, replies::WRITE_FORMAT_ERROR);
        assert_eq!(bot.sessions().get("U1"), SessionMode::WritePending);
        assert!(store.is_empty());

        let reply = bot.dispatch("U1", "/cancel").await;
        assert_eq!(reply, replies::CANCELLED);
        assert_eq!(bot.sessions().get("U1"), SessionMode::None);
    }

    #[tokio::test]
    async fn test_read_flow_variants() {
        let (store, bot) = course_bot();

        bot.dispatch("U1", "/read").await;
        assert_eq!(bot.sessions().get("U1"), SessionMode::ReadPending);
        let reply = bot.dispatch("U1", "不存在 的課").await;
        assert_eq!(reply, replies::no_record("不存在 的課"));
        assert_eq!(bot.sessions().get("U1"), SessionMode::None);

        store
            .set_document(
                "feedbacks",
                "空 課程",
                json!({"回饋": []}).as_object().cloned().unwrap(),
                false,
            )
            .await
            .unwrap();
        bot.dispatch("U1", "/read").await;
        assert_eq!(bot.dispatch("U1", "空 課程").await, replies::no_feedback_yet("空 課程"));

        bot.dispatch("U2", "/write").await;
        bot.dispatch("U2", "王 OS\n很好, 推").await;
        bot.dispatch("U2", "/write").await;
        bot.dispatch("U2", "王 OS\n第二則\n第二行").await;
        bot.dispatch("U1", "/read").await;
        assert_eq!(
            bot.dispatch("U1", "王 OS").await,
            "【王 OS】課程評價：\n- 很好, 推\n- 第二則\n第二行"
        );
    }

    #[tokio::test]
    async fn test_concurrent_messages_from_one_user_are_serialized() {
        let store = Arc::new(SlowStore(MemoryStore::new()));
        let bot = Dispatcher::new(&bot_config(BotMode::Course), store.clone(), None);

        bot.dispatch("U1", "/write").await;
        let (a, b) = tokio::join!(
            bot.dispatch("U1", "王 OS\n很好"),
            bot.dispatch("U1", "王 OS\n很好"),
        );

        // The second message sees the state left by the first.
        let mut replies = [a, b];
        replies.sort();
        let mut expected = [replies::feedback_saved("王 OS"), replies::HELP.to_string()];
        expected.sort();
        assert_eq!(replies, expected);

        assert_eq!(bot.sessions().get("U1"), SessionMode::None);
        let doc = store.get_document("feedbacks", "王 OS").await.unwrap().unwrap();
        assert_eq!(doc["回饋"], json!(["很好"]));
    }

    #[tokio::test]
    async fn test_write_then_submit_sent_together_completes() {
        let store = Arc::new(SlowStore(MemoryStore::new()));
        let bot = Dispatcher::new(&bot_config(BotMode::Course), store.clone(), None);

        let (first, second) = tokio::join!(
            bot.dispatch("U1", "/write"),
            async {
                tokio::task::yield_now().await;
                bot.dispatch("U1", "王 OS\n很好").await
            },
        );

        assert!(first.contains("教授名稱 課程名稱"));
        assert_eq!(second, replies::feedback_saved("王 OS"));
        assert_eq!(bot.sessions().get("U1"), SessionMode::None);
        let doc = store.get_document("feedbacks", "王 OS").await.unwrap().unwrap();
        assert_eq!(doc["回饋"], json!(["很好"]));
    }

    #[tokio::test]
    async fn test_model_text_is_kept_verbatim() {
        let provider = MockProvider::answering(Some("  答案\n"));
        let (store, bot) = chat_bot(provider);

        assert_eq!(bot.dispatch("U1", "問題").await, "  答案\n");
        assert_eq!(
            history(&store).await,
            json!([
                {"role": "user", "content": "問題"},
                {"role": "assistant", "content": "  答案\n"}
            ])
        );
    }

    #[tokio::test]
    async fn test_idle_text_gets_help() {
        let (_, bot) = course_bot();
        assert_eq!(bot.dispatch("U1", "hi").await, replies::HELP);
        assert_eq!(bot.sessions().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_pending_state() {
        let bot = Dispatcher::new(&bot_config(BotMode::Course), Arc::new(FailingStore), None);

        bot.dispatch("U1", "/write").await;
        let reply = bot.dispatch("U1", "王 OS\n很好").await;
        assert_eq!(reply, replies::RETRY_LATER);
        assert_eq!(bot.sessions().get("U1"), SessionMode::WritePending);

        bot.dispatch("U1", "/read").await;
        assert_eq!(bot.sessions().get("U1"), SessionMode::WritePending);

        bot.dispatch("U2", "/read").await;
        assert_eq!(bot.dispatch("U2", "王 OS").await, replies::RETRY_LATER);
        assert_eq!(bot.sessions().get("U2"), SessionMode::ReadPending);
    }

    #[tokio::test]
    async fn test_first_chat_turn_sends_raw_message() {
        let provider = MockProvider::answering(Some("你好！"));
        let (store, bot) = chat_bot(provider.clone());

        let reply = bot.dispatch("U1", "你好").await;
        assert_eq!(reply, "你好！");
        assert_eq!(*provider.prompts.lock().unwrap(), vec!["你好".to_string()]);
        assert_eq!(
            history(&store).await,
            json!([
                {"role": "user", "content": "你好"},
                {"role": "assistant", "content": "你好！"}
            ])
        );
    }

    #[tokio::test]
    async fn test_later_turns_include_history() {
        let provider = MockProvider::answering(Some("好"));
        let (_, bot) = chat_bot(provider.clone());

        bot.dispatch("U1", "第一句").await;
        bot.dispatch("U2", "第二句").await;

        let prompts = provider.prompts.lock().unwrap();
        let expected_history =
            serde_json::to_string(&[ChatEntry::user("第一句"), ChatEntry::assistant("好")])
                .unwrap();
        assert_eq!(
            prompts[1],
            format!("之前的歷史對話為{expected_history}，請根據歷史對話，回答第二句")
        );
    }

    #[tokio::test]
    async fn test_model_failure_leaves_history_unchanged() {
        let (store, bot) = chat_bot(MockProvider::answering(None));
        assert_eq!(bot.dispatch("U1", "你好").await, replies::NO_ANSWER);
        assert_eq!(history(&store).await, json!(null));
    }

    #[tokio::test]
    async fn test_delete_resets_history() {
        let (store, bot) = chat_bot(MockProvider::answering(Some("嗨")));
        bot.dispatch("U1", "你好").await;

        assert_eq!(bot.dispatch("U1", "/delete").await, replies::HISTORY_DELETED);
        assert_eq!(bot.dispatch("U1", "/DELETE").await, replies::HISTORY_DELETED);
        assert_eq!(history(&store).await, json!([]));
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported() {
        let bot = Dispatcher::new(
            &bot_config(BotMode::Chat),
            Arc::new(FailingStore),
            Some(MockProvider::answering(Some("x"))),
        );
        assert_eq!(bot.dispatch("U1", "/delete").await, replies::HISTORY_DELETE_FAILED);
        assert_eq!(bot.dispatch("U1", "你好").await, replies::RETRY_LATER);
    }

    #[tokio::test]
    async fn test_welcome_depends_on_mode() {
        let (_, course) = course_bot();
        assert_eq!(course.welcome(), replies::HELP);
        let (_, chat) = chat_bot(MockProvider::answering(None));
        assert_eq!(chat.welcome(), replies::CHAT_WELCOME);
    }
}
