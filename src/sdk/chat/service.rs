//! 聊天同步服务层
//!
//! 历史记录只存在本地；每次发送先把用户消息和助手占位消息一起追加并持久化，
//! 再调用补全服务，结果原地替换占位消息。同一时间只允许一个请求在途。

use crate::sdk::chat::api::{CompletionMessage, CompletionOptions, CompletionService};
use crate::sdk::chat::listener::{ChatListener, EmptyChatListener};
use crate::sdk::chat::models::{ChatMessage, ChatRole, CompletionConfig};
use crate::sdk::error::{SyncError, SyncResult};
use crate::sdk::store::{keys, CacheStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 上次进程退出时未完成的回复
const INTERRUPTED_REPLY: &str = "The reply was interrupted before it finished. Please ask again.";

/// 聊天同步器
#[derive(Clone)]
pub struct ChatSyncer {
    core: Arc<ChatCore>,
}

struct ChatCore {
    completion: Arc<dyn CompletionService>,
    cache: CacheStore,
    config: CompletionConfig,
    listener: Arc<dyn ChatListener>,
    state: Mutex<ChatState>,
}

#[derive(Default)]
struct ChatState {
    user_id: Option<String>,
    epoch: u64,
    messages: Vec<ChatMessage>,
    /// 在途的补全请求（跨 epoch 保留，直到请求返回）
    in_flight: Option<InFlight>,
}

struct InFlight {
    user_id: String,
    placeholder_id: String,
}

impl ChatSyncer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        cache: CacheStore,
        config: CompletionConfig,
    ) -> Self {
        Self::with_listener(completion, cache, config, Arc::new(EmptyChatListener))
    }

    pub fn with_listener(
        completion: Arc<dyn CompletionService>,
        cache: CacheStore,
        config: CompletionConfig,
        listener: Arc<dyn ChatListener>,
    ) -> Self {
        Self {
            core: Arc::new(ChatCore {
                completion,
                cache,
                config,
                listener,
                state: Mutex::new(ChatState::default()),
            }),
        }
    }

    /// 加载本地历史；上次未完成的占位消息转为错误消息
    ///
    /// 同一用户已加载时不做任何事，在途请求照常落定。
    pub async fn activate(&self, user_id: &str) -> SyncResult<()> {
        if user_id.is_empty() {
            return Err(SyncError::NotAuthenticated);
        }
        let epoch = {
            let mut state = self.core.state.lock().await;
            if state.user_id.as_deref() == Some(user_id) {
                debug!("[ChatSync] 用户 {} 的聊天记录已加载，忽略重复激活", user_id);
                return Ok(());
            }
            state.epoch += 1;
            state.user_id = Some(user_id.to_string());
            state.messages.clear();
            state.epoch
        };

        let key = keys::chat(user_id);
        let history: Vec<ChatMessage> = self.core.cache.load_json(&key).await.unwrap_or_default();

        let messages = {
            let mut state = self.core.state.lock().await;
            if state.epoch != epoch {
                debug!("[ChatSync] 加载历史期间已失效，放弃结果");
                return Ok(());
            }
            // 本进程仍在等待的占位消息保持 pending
            let live = state
                .in_flight
                .as_ref()
                .filter(|f| f.user_id == user_id)
                .map(|f| f.placeholder_id.clone());
            state.messages = history;
            let mut interrupted = 0;
            for msg in state
                .messages
                .iter_mut()
                .filter(|m| m.pending && live.as_deref() != Some(m.id.as_str()))
            {
                msg.fail(INTERRUPTED_REPLY.to_string());
                interrupted += 1;
            }
            if interrupted > 0 {
                warn!("[ChatSync] 发现 {} 条未完成的回复，已标记为错误", interrupted);
                self.core.persist(user_id, &state.messages).await;
            }
            state.messages.clone()
        };
        info!(
            "[ChatSync] ✅ 聊天记录已加载，用户ID: {}，共 {} 条",
            user_id,
            messages.len()
        );
        self.core.notify_messages(&messages).await;
        Ok(())
    }

    /// 清空内存中的会话（本地历史保留）
    pub async fn teardown(&self) {
        {
            let mut state = self.core.state.lock().await;
            state.epoch += 1;
            state.user_id = None;
            state.messages.clear();
        }
        info!("[ChatSync] 聊天同步器已销毁");
        self.core.notify_messages(&[]).await;
    }

    pub async fn set_current_user(&self, user_id: Option<&str>) -> SyncResult<()> {
        match user_id {
            Some(uid) => {
                if self.core.state.lock().await.user_id.as_deref() == Some(uid) {
                    return Ok(());
                }
                self.activate(uid).await
            }
            None => {
                self.teardown().await;
                Ok(())
            }
        }
    }

    /// 当前消息（按时间正序）
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.core.state.lock().await.messages.clone()
    }

    pub async fn is_sending(&self) -> bool {
        self.core.state.lock().await.in_flight.is_some()
    }

    /// 发送一条消息，返回落定后的助手消息
    ///
    /// 补全失败不会返回错误：占位消息被替换为 `error = true` 的提示文本。
    pub async fn send_message(&self, text: &str) -> SyncResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidInput("message is empty".to_string()));
        }

        let (user_id, placeholder_id, context, messages) = {
            let mut state = self.core.state.lock().await;
            let user_id = state.user_id.clone().ok_or(SyncError::NotAuthenticated)?;
            if state.in_flight.is_some() {
                return Err(SyncError::RequestInFlight);
            }

            let now = chrono::Utc::now();
            let user_msg = ChatMessage::user(text, now);
            let placeholder = ChatMessage::placeholder(now);
            let placeholder_id = placeholder.id.clone();
            state.messages.push(user_msg);
            state.messages.push(placeholder);
            state.in_flight = Some(InFlight {
                user_id: user_id.clone(),
                placeholder_id: placeholder_id.clone(),
            });
            // 调用补全之前先落盘
            self.core.persist(&user_id, &state.messages).await;

            let context = self.core.build_context(&state.messages);
            (
                user_id,
                placeholder_id,
                context,
                state.messages.clone(),
            )
        };
        debug!("[ChatSync] 发送消息，上下文 {} 条", context.len());
        self.core.notify_messages(&messages).await;
        self.core.listener.on_sending_changed(true).await;

        let result = self
            .core
            .completion
            .complete(&context, &self.core.options())
            .await;

        let settled = {
            let mut state = self.core.state.lock().await;
            state.in_flight = None;
            // 期间重新激活过同一用户也照常落定
            if state.user_id.as_deref() != Some(user_id.as_str()) {
                None
            } else {
                match state.messages.iter_mut().find(|m| m.id == placeholder_id) {
                    Some(msg) => {
                        match result {
                            Ok(reply) => msg.resolve(reply),
                            Err(e) => {
                                error!("[ChatSync] 补全失败: {}", e);
                                msg.fail(e.user_message().to_string());
                            }
                        }
                        let settled = msg.clone();
                        self.core.persist(&user_id, &state.messages).await;
                        Some((settled, state.messages.clone()))
                    }
                    // 请求期间历史被清空
                    None => None,
                }
            }
        };

        self.core.listener.on_sending_changed(false).await;
        match settled {
            Some((msg, messages)) => {
                self.core.notify_messages(&messages).await;
                Ok(msg)
            }
            None => {
                debug!("[ChatSync] 会话已变化，丢弃补全结果");
                Err(SyncError::NotActive)
            }
        }
    }

    /// 清空当前用户的聊天记录（内存和本地）
    pub async fn clear_history(&self) -> SyncResult<()> {
        {
            let mut state = self.core.state.lock().await;
            let user_id = state.user_id.clone().ok_or(SyncError::NotAuthenticated)?;
            state.messages.clear();
            self.core.cache.remove(&keys::chat(&user_id)).await;
        }
        info!("[ChatSync] 聊天记录已清空");
        self.core.notify_messages(&[]).await;
        Ok(())
    }
}

impl ChatCore {
    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            api_key: self.config.api_key.clone(),
        }
    }

    /// 系统提示 + 最近 N 条有效消息
    fn build_context(&self, messages: &[ChatMessage]) -> Vec<CompletionMessage> {
        let usable: Vec<&ChatMessage> = messages.iter().filter(|m| m.is_context()).collect();
        let skip = usable.len().saturating_sub(self.config.context_window);

        let mut context = Vec::with_capacity(self.config.context_window + 1);
        if let Some(prompt) = self.config.system_prompt.as_deref() {
            context.push(CompletionMessage::new(ChatRole::System, prompt));
        }
        context.extend(
            usable
                .into_iter()
                .skip(skip)
                .map(|m| CompletionMessage::new(m.role, m.text.clone())),
        );
        context
    }

    async fn persist(&self, user_id: &str, messages: &[ChatMessage]) {
        if !self.cache.save_json(&keys::chat(user_id), messages).await {
            warn!("[ChatSync] 聊天记录写入本地缓存失败");
        }
    }

    async fn notify_messages(&self, messages: &[ChatMessage]) {
        match serde_json::to_string(messages) {
            Ok(json) => self.listener.on_message_list_changed(json).await,
            Err(e) => error!("[ChatSync] 消息列表序列化失败: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::chat::api::CompletionError;
    use crate::sdk::store::{LocalStore, MemoryLocalStore};
    use crate::sdk::testing::{init_test_logger, ts, wait_until, FakeCompletion, RecordingListener};
    use std::sync::atomic::Ordering;

    fn config(window: usize) -> CompletionConfig {
        let mut config = CompletionConfig::new(Some("sk-test".to_string()));
        config.system_prompt = Some("farm helper".to_string());
        config.context_window = window;
        config
    }

    fn chat_with(
        completion: Arc<FakeCompletion>,
        store: Arc<MemoryLocalStore>,
        listener: Arc<RecordingListener>,
        window: usize,
    ) -> ChatSyncer {
        init_test_logger();
        ChatSyncer::with_listener(
            completion,
            CacheStore::new(store),
            config(window),
            listener,
        )
    }

    fn pending(messages: &[ChatMessage]) -> usize {
        messages.iter().filter(|m| m.pending).count()
    }

    #[tokio::test]
    async fn placeholder_is_resolved_in_place() {
        let completion = Arc::new(FakeCompletion::new());
        completion.push_reply(Ok("Irrigate early in the morning.".to_string()));
        let store = Arc::new(MemoryLocalStore::new());
        let listener = RecordingListener::new();
        let chat = chat_with(completion.clone(), store.clone(), listener.clone(), 10);
        chat.activate("u1").await.unwrap();

        completion.gate.close();
        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("When should I water?").await });

        let watcher = chat.clone();
        wait_until(|| {
            let watcher = watcher.clone();
            async move { watcher.is_sending().await }
        })
        .await;
        let during = chat.messages().await;
        assert_eq!(during.len(), 2);
        assert_eq!(pending(&during), 1);
        assert_eq!(during[0].role, ChatRole::User);
        let placeholder_id = during[1].id.clone();

        // 占位消息在调用前已经持久化
        let persisted: Vec<ChatMessage> =
            serde_json::from_slice(&store.get("chat:u1").await.unwrap().unwrap()).unwrap();
        assert_eq!(pending(&persisted), 1);

        completion.gate.open();
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.id, placeholder_id);
        assert_eq!(reply.text, "Irrigate early in the morning.");
        assert!(!reply.error);

        let after = chat.messages().await;
        assert_eq!(after.len(), 2);
        assert_eq!(pending(&after), 0);
        assert!(!chat.is_sending().await);
        assert_eq!(listener.sending(), vec![true, false]);
    }

    #[tokio::test]
    async fn completion_failure_becomes_error_message() {
        let completion = Arc::new(FakeCompletion::new());
        completion.push_reply(Err(CompletionError::InvalidCredential));
        let chat = chat_with(
            completion,
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            10,
        );
        chat.activate("u1").await.unwrap();

        let reply = chat.send_message("hello").await.unwrap();
        assert!(reply.error);
        assert!(!reply.pending);
        assert_eq!(reply.text, CompletionError::InvalidCredential.user_message());
        assert_eq!(pending(&chat.messages().await), 0);
    }

    #[tokio::test]
    async fn second_send_is_rejected_while_in_flight() {
        let completion = Arc::new(FakeCompletion::new());
        let chat = chat_with(
            completion.clone(),
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            10,
        );
        chat.activate("u1").await.unwrap();

        completion.gate.close();
        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("first").await });
        let watcher = chat.clone();
        wait_until(|| {
            let watcher = watcher.clone();
            async move { watcher.is_sending().await }
        })
        .await;

        assert!(matches!(
            chat.send_message("second").await,
            Err(SyncError::RequestInFlight)
        ));
        completion.gate.open();
        task.await.unwrap().unwrap();
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn empty_text_and_missing_user_are_rejected() {
        let chat = chat_with(
            Arc::new(FakeCompletion::new()),
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            10,
        );
        assert!(matches!(
            chat.send_message("hi").await,
            Err(SyncError::NotAuthenticated)
        ));
        chat.activate("u1").await.unwrap();
        assert!(matches!(
            chat.send_message("   ").await,
            Err(SyncError::InvalidInput(_))
        ));
        assert!(chat.messages().await.is_empty());
    }

    #[tokio::test]
    async fn context_uses_system_prompt_and_recent_messages() {
        let completion = Arc::new(FakeCompletion::new());
        completion.push_reply(Ok("a1".to_string()));
        completion.push_reply(Err(CompletionError::Network("timeout".to_string())));
        completion.push_reply(Ok("a3".to_string()));
        let chat = chat_with(
            completion.clone(),
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            3,
        );
        chat.activate("u1").await.unwrap();

        chat.send_message("q1").await.unwrap();
        chat.send_message("q2").await.unwrap();
        chat.send_message("q3").await.unwrap();

        let requests = completion.requests();
        assert_eq!(requests.len(), 3);
        let last: Vec<(ChatRole, String)> = requests[2]
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect();
        // 错误消息和占位消息不进入上下文
        assert_eq!(
            last,
            vec![
                (ChatRole::System, "farm helper".to_string()),
                (ChatRole::Assistant, "a1".to_string()),
                (ChatRole::User, "q2".to_string()),
                (ChatRole::User, "q3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn interrupted_reply_is_marked_as_error_on_activation() {
        let store = Arc::new(MemoryLocalStore::new());
        let mut placeholder = ChatMessage::placeholder(ts(200));
        placeholder.id = "p1".to_string();
        let history = vec![ChatMessage::user("soil ph?", ts(200)), placeholder];
        store
            .set("chat:u1", &serde_json::to_vec(&history).unwrap())
            .await
            .unwrap();

        let chat = chat_with(
            Arc::new(FakeCompletion::new()),
            store.clone(),
            RecordingListener::new(),
            10,
        );
        chat.activate("u1").await.unwrap();

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(pending(&messages), 0);
        assert!(messages[1].error);
        assert_eq!(messages[1].id, "p1");

        let persisted: Vec<ChatMessage> =
            serde_json::from_slice(&store.get("chat:u1").await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted, messages);
    }

    #[tokio::test]
    async fn history_survives_reload_and_clear_removes_it() {
        let store = Arc::new(MemoryLocalStore::new());
        let first = chat_with(
            Arc::new(FakeCompletion::new()),
            store.clone(),
            RecordingListener::new(),
            10,
        );
        first.activate("u1").await.unwrap();
        first.send_message("hello").await.unwrap();
        let before = first.messages().await;

        let second = chat_with(
            Arc::new(FakeCompletion::new()),
            store.clone(),
            RecordingListener::new(),
            10,
        );
        second.activate("u1").await.unwrap();
        assert_eq!(second.messages().await, before);

        second.clear_history().await.unwrap();
        assert!(second.messages().await.is_empty());
        assert!(store.get("chat:u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_reply_after_teardown_is_dropped() {
        let completion = Arc::new(FakeCompletion::new());
        let chat = chat_with(
            completion.clone(),
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            10,
        );
        chat.activate("u1").await.unwrap();

        completion.gate.close();
        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("hello").await });
        let watcher = chat.clone();
        wait_until(|| {
            let watcher = watcher.clone();
            async move { watcher.is_sending().await }
        })
        .await;

        chat.teardown().await;
        completion.gate.open();
        assert!(matches!(task.await.unwrap(), Err(SyncError::NotActive)));
        assert!(chat.messages().await.is_empty());
        assert!(!chat.is_sending().await);

        // 重新激活后，被打断的占位消息显示为错误
        chat.activate("u1").await.unwrap();
        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].error);
    }

    #[tokio::test]
    async fn reactivation_keeps_in_flight_reply() {
        let completion = Arc::new(FakeCompletion::new());
        completion.push_reply(Ok("final answer".to_string()));
        let chat = chat_with(
            completion.clone(),
            Arc::new(MemoryLocalStore::new()),
            RecordingListener::new(),
            10,
        );
        chat.activate("u1").await.unwrap();

        completion.gate.close();
        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("q").await });
        let watcher = chat.clone();
        wait_until(|| {
            let watcher = watcher.clone();
            async move { watcher.is_sending().await }
        })
        .await;

        chat.activate("u1").await.unwrap();
        let during = chat.messages().await;
        assert_eq!(during.len(), 2);
        assert_eq!(pending(&during), 1);
        assert!(!during[1].error);
        assert!(chat.is_sending().await);

        completion.gate.open();
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.text, "final answer");
        let after = chat.messages().await;
        assert_eq!(pending(&after), 0);
        assert_eq!(after[1].text, "final answer");
        assert!(!after[1].error);
    }

    #[tokio::test]
    async fn reply_lands_after_teardown_and_reactivation() {
        let completion = Arc::new(FakeCompletion::new());
        completion.push_reply(Ok("final answer".to_string()));
        let store = Arc::new(MemoryLocalStore::new());
        let chat = chat_with(completion.clone(), store.clone(), RecordingListener::new(), 10);
        chat.activate("u1").await.unwrap();

        completion.gate.close();
        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("q").await });
        let watcher = chat.clone();
        wait_until(|| {
            let watcher = watcher.clone();
            async move { watcher.is_sending().await }
        })
        .await;

        chat.teardown().await;
        chat.activate("u1").await.unwrap();
        // 请求仍在途，占位消息不能被标记为中断
        assert_eq!(pending(&chat.messages().await), 1);

        completion.gate.open();
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.text, "final answer");

        let persisted: Vec<ChatMessage> =
            serde_json::from_slice(&store.get("chat:u1").await.unwrap().unwrap()).unwrap();
        assert_eq!(pending(&persisted), 0);
        assert_eq!(persisted[1].text, "final answer");
    }
}
