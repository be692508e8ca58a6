//! Per-user mutable state and the registry that owns it.
//!
//! The registry is a keyed map of per-session locks: arbitrary tasks
//! resolve a session through the outer `RwLock`, then serialize on that
//! session's own `Mutex`. State is fully partitioned by username; within
//! a session, each (model) conversation is mutated by at most one driver
//! task at a time because submitting cancels the prior in-flight stream
//! for that model before starting a new one.

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::assistant::{output_file_name, AssistantClient};
use crate::core::catalog::CatalogManager;
use crate::core::chat_stream::{Snapshots, StreamOutcome, TransportError};
use crate::core::client::{GeneratedImage, ImageAttachment, ImagePrompt, ModelClient};
use crate::core::config::{ConfigStore, ModelKind, ASSISTANT_PRESET_NAME};
use crate::core::message::{ChatHistoryEntry, Conversation, Message};
use crate::core::stream_router::StreamEvent;

#[derive(Debug)]
pub enum SessionError {
    UnknownModel(String),
    WrongKind { model: String, operation: &'static str },
    Transport(TransportError),
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownModel(name) => write!(f, "no configured model named '{name}'"),
            SessionError::WrongKind { model, operation } => {
                write!(f, "model '{model}' does not support {operation}")
            }
            SessionError::Transport(err) => write!(f, "{err}"),
            SessionError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionError::Transport(err) => Some(err),
            SessionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err)
    }
}

struct StreamGuard {
    cancel: CancellationToken,
    id: u64,
}

/// All mutable state for one logged-in user. Lives for the process
/// lifetime; never shared between usernames.
pub struct UserSession {
    username: String,
    pub catalog: CatalogManager,
    clients: HashMap<String, Arc<ModelClient>>,
    conversations: HashMap<String, Conversation>,
    histories: HashMap<String, Vec<ChatHistoryEntry>>,
    streams: HashMap<String, StreamGuard>,
    next_stream_id: u64,
    assistant: Option<Arc<AssistantClient>>,
    pending_downloads: VecDeque<PathBuf>,
}

impl UserSession {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn client(&self, model_name: &str) -> Option<&Arc<ModelClient>> {
        self.clients.get(model_name)
    }

    pub fn conversation(&self, model_name: &str) -> Option<&Conversation> {
        self.conversations.get(model_name)
    }

    pub fn history(&self, model_name: &str) -> &[ChatHistoryEntry] {
        self.histories
            .get(model_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Appends a completed exchange to the replay history.
    pub fn record_exchange(
        &mut self,
        model_name: &str,
        user_turn: impl Into<String>,
        assistant_turn: impl Into<String>,
    ) {
        self.histories
            .entry(model_name.to_string())
            .or_default()
            .push(ChatHistoryEntry::new(user_turn, assistant_turn));
    }

    /// Cancels any in-flight stream for the model and registers a fresh
    /// guard for the next one.
    fn begin_stream(&mut self, model_name: &str) -> (CancellationToken, u64) {
        if let Some(prior) = self.streams.get(model_name) {
            prior.cancel.cancel();
        }
        self.next_stream_id += 1;
        let id = self.next_stream_id;
        let cancel = CancellationToken::new();
        self.streams.insert(
            model_name.to_string(),
            StreamGuard {
                cancel: cancel.clone(),
                id,
            },
        );
        (cancel, id)
    }

    fn stream_is_current(&self, model_name: &str, id: u64) -> bool {
        self.streams
            .get(model_name)
            .is_some_and(|guard| guard.id == id && !guard.cancel.is_cancelled())
    }

    /// Applies a finished stream to the session, if it has not been
    /// superseded. Completed exchanges commit the user and assistant
    /// turns together, so no reader ever observes half an exchange; a
    /// failed stream records only the replay history (the model never
    /// sees diagnostic text as its own output).
    fn commit_outcome(
        &mut self,
        model_name: &str,
        stream_id: u64,
        user_turn: Message,
        outcome: StreamOutcome,
    ) {
        if !self.stream_is_current(model_name, stream_id) {
            tracing::debug!(model = model_name, "discarding superseded stream outcome");
            return;
        }
        let question = user_turn.content.display_text();
        match outcome {
            StreamOutcome::Completed(answer) => {
                if let Some(conversation) = self.conversations.get_mut(model_name) {
                    conversation.push_exchange(user_turn, Message::assistant(answer.clone()));
                }
                self.record_exchange(model_name, question, answer);
            }
            StreamOutcome::Failed(diagnostic) => {
                self.record_exchange(model_name, question, diagnostic);
            }
            StreamOutcome::Cancelled => {}
        }
    }

    pub fn push_download(&mut self, path: PathBuf) {
        self.pending_downloads.push_back(path);
    }

    /// Pops the oldest pending download. Draining past the end yields
    /// `None`, never a previously taken path.
    pub fn take_download(&mut self) -> Option<PathBuf> {
        self.pending_downloads.pop_front()
    }
}

/// The single point of truth for which conversation and client a
/// (user, model) pair uses.
pub struct SessionStore {
    config: Arc<ConfigStore>,
    http: reqwest::Client,
    downloads_dir: PathBuf,
    sessions: RwLock<HashMap<String, Arc<Mutex<UserSession>>>>,
}

impl SessionStore {
    pub fn new(config: Arc<ConfigStore>, downloads_dir: PathBuf) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            downloads_dir,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.config.verify_credentials(username, password)
    }

    /// Resolves the user's session, initializing it on first sight from
    /// the user's preset catalog (or the shared one).
    pub async fn get_or_create(&self, username: &str) -> Arc<Mutex<UserSession>> {
        if let Some(session) = self.sessions.read().await.get(username) {
            return session.clone();
        }

        let catalog = CatalogManager::load_for_user(&self.config, username);
        let default_text = catalog.default_text().to_string();
        let assistant_text = catalog
            .get(ASSISTANT_PRESET_NAME)
            .unwrap_or(&default_text)
            .to_string();

        let mut clients = HashMap::new();
        let mut conversations = HashMap::new();
        let mut histories = HashMap::new();
        for model_config in self.config.models() {
            let name = model_config.model_name.clone();
            let system_text = if model_config.kind() == ModelKind::Assistant {
                assistant_text.clone()
            } else {
                default_text.clone()
            };
            clients.insert(
                name.clone(),
                Arc::new(ModelClient::new(self.http.clone(), model_config.clone())),
            );
            conversations.insert(name.clone(), Conversation::new(system_text));
            histories.insert(name, Vec::new());
        }

        let session = UserSession {
            username: username.to_string(),
            catalog,
            clients,
            conversations,
            histories,
            streams: HashMap::new(),
            next_stream_id: 0,
            assistant: None,
            pending_downloads: VecDeque::new(),
        };

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(username.to_string())
            .or_insert_with(|| {
                tracing::debug!(user = username, "created session");
                Arc::new(Mutex::new(session))
            })
            .clone()
    }

    /// Submits a chat or vision question. Returns the snapshot sequence
    /// for rendering; the exchange commits to the conversation when the
    /// stream completes. A still-running stream for the same (user,
    /// model) pair is cancelled first.
    pub async fn submit_chat(
        &self,
        username: &str,
        model_name: &str,
        question: &str,
        system_message: Option<String>,
        attachments: Vec<ImageAttachment>,
        max_tokens: u32,
    ) -> Result<Snapshots, SessionError> {
        let session_arc = self.get_or_create(username).await;
        let (client, user_turn, api_messages, cancel, stream_id) = {
            let mut session = session_arc.lock().await;
            let client = session
                .clients
                .get(model_name)
                .ok_or_else(|| SessionError::UnknownModel(model_name.to_string()))?
                .clone();
            if !matches!(client.kind(), ModelKind::Chat | ModelKind::Vision) {
                return Err(SessionError::WrongKind {
                    model: model_name.to_string(),
                    operation: "chat",
                });
            }

            let conversation = session
                .conversations
                .get_mut(model_name)
                .expect("conversation exists for every client");
            if let Some(system_text) = system_message {
                conversation.set_system(system_text);
            }
            let system_text = conversation.system_text();
            let user_turn = client.build_user_turn(&system_text, question, &attachments);
            let api_messages = conversation.to_api_with(Some(&user_turn));
            let (cancel, stream_id) = session.begin_stream(model_name);
            (client, user_turn, api_messages, cancel, stream_id)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let session_task = session_arc.clone();
        let model_task = model_name.to_string();
        let username_task = username.to_string();
        tokio::spawn(async move {
            let outcome = match client.kind() {
                ModelKind::Vision => {
                    tokio::select! {
                        outcome = client.converse_vision(api_messages, max_tokens, &username_task, &tx) => outcome,
                        _ = cancel.cancelled() => StreamOutcome::Cancelled,
                    }
                }
                _ => {
                    client
                        .converse(api_messages, max_tokens, &username_task, cancel.clone(), &tx)
                        .await
                }
            };
            let mut session = session_task.lock().await;
            session.commit_outcome(&model_task, stream_id, user_turn, outcome);
        });

        Ok(Snapshots::new(rx))
    }

    /// Submits a question to the assistant mode. The returned events are
    /// already normalized; file outputs have been fetched, persisted
    /// under the downloads directory, and queued for download by the time
    /// their event arrives.
    pub async fn submit_assistant(
        &self,
        username: &str,
        prompt: &str,
        file: Option<PathBuf>,
        instructions: String,
        backing_model: Option<String>,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, SessionError> {
        let assistant_tab = self
            .config
            .models()
            .iter()
            .find(|config| config.kind() == ModelKind::Assistant)
            .ok_or_else(|| SessionError::UnknownModel("Assistants".to_string()))?
            .model_name
            .clone();

        let session_arc = self.get_or_create(username).await;
        let (assistant, file_ids, cancel, stream_id) = {
            let mut session = session_arc.lock().await;
            let assistant = self
                .ensure_assistant(&mut session, backing_model.as_deref())
                .await?;

            let mut file_ids = Vec::new();
            if let Some(path) = file {
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                let bytes = tokio::fs::read(&path).await?;
                file_ids.push(assistant.upload_file(&filename, bytes).await?);
            }

            let (cancel, stream_id) = session.begin_stream(&assistant_tab);
            (assistant, file_ids, cancel, stream_id)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (router_tx, mut router_rx) = mpsc::unbounded_channel();

        let run_assistant = assistant.clone();
        let run_prompt = prompt.to_string();
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            run_assistant
                .run_stream(&run_prompt, file_ids, &instructions, run_cancel, &router_tx)
                .await;
        });

        let session_task = session_arc.clone();
        let downloads_dir = self.downloads_dir.clone();
        let prompt_task = prompt.to_string();
        tokio::spawn(async move {
            let mut transcript = String::new();
            while let Some(event) = router_rx.recv().await {
                if let Some(text) = event.transcript_text() {
                    transcript.push_str(text);
                }
                let file_ready = match &event {
                    StreamEvent::ToolCallOutputReady { file_id, kind } => {
                        Some((file_id.clone(), kind.clone()))
                    }
                    _ => None,
                };
                let _ = tx.send(event);

                if let Some((file_id, kind)) = file_ready {
                    match download_output(&assistant, &downloads_dir, &file_id, &kind).await {
                        Ok(path) => {
                            let mut session = session_task.lock().await;
                            session.push_download(path);
                            let suffix = if transcript.ends_with("```") {
                                "\n\n"
                            } else {
                                "\n```\n\n"
                            };
                            transcript.push_str(suffix);
                            let _ = tx.send(StreamEvent::TextDelta(suffix.to_string()));
                        }
                        Err(err) => {
                            tracing::debug!(file = %file_id, "output download failed: {err}");
                            let _ = tx.send(StreamEvent::Error(err.diagnostic()));
                        }
                    }
                }
            }

            let mut session = session_task.lock().await;
            if session.stream_is_current(&assistant_tab, stream_id) {
                session.record_exchange(&assistant_tab, prompt_task, transcript);
            }
        });

        Ok(rx)
    }

    async fn ensure_assistant(
        &self,
        session: &mut UserSession,
        backing_model: Option<&str>,
    ) -> Result<Arc<AssistantClient>, SessionError> {
        let backing_config = match backing_model {
            Some(name) => self
                .config
                .model(name)
                .ok_or_else(|| SessionError::UnknownModel(name.to_string()))?
                .clone(),
            None => match &session.assistant {
                Some(existing) => {
                    return Ok(existing.clone());
                }
                None => self
                    .config
                    .models()
                    .iter()
                    .find(|config| config.kind() == ModelKind::Chat)
                    .ok_or_else(|| SessionError::UnknownModel("chat".to_string()))?
                    .clone(),
            },
        };

        let needs_rebuild = session
            .assistant
            .as_ref()
            .map(|assistant| assistant.backing_model() != backing_config.model_name)
            .unwrap_or(true);
        if needs_rebuild {
            let created =
                AssistantClient::create(self.http.clone(), backing_config).await?;
            session.assistant = Some(Arc::new(created));
        }
        Ok(session
            .assistant
            .as_ref()
            .expect("assistant client just ensured")
            .clone())
    }

    /// Clears the (user, model) conversation back to its system message
    /// and empties its history. The assistant model additionally discards
    /// and recreates the remote thread and assistant.
    pub async fn reset(&self, username: &str, model_name: &str) -> Result<(), SessionError> {
        let model_config = self
            .config
            .model(model_name)
            .ok_or_else(|| SessionError::UnknownModel(model_name.to_string()))?
            .clone();

        let session_arc = self.get_or_create(username).await;
        let mut session = session_arc.lock().await;

        if let Some(guard) = session.streams.get(model_name) {
            guard.cancel.cancel();
        }

        if model_config.kind() == ModelKind::Assistant {
            let backing_config = match &session.assistant {
                Some(existing) => self
                    .config
                    .model(existing.backing_model())
                    .cloned(),
                None => None,
            };
            if let Some(config) = backing_config {
                let created = AssistantClient::create(self.http.clone(), config).await?;
                session.assistant = Some(Arc::new(created));
            } else {
                session.assistant = None;
            }
        }

        if let Some(conversation) = session.conversations.get_mut(model_name) {
            conversation.reset();
        }
        if let Some(history) = session.histories.get_mut(model_name) {
            history.clear();
        }
        Ok(())
    }

    /// One image generation through the configured image model. The
    /// typed error is degraded to text only at the presentation boundary.
    pub async fn generate_image(
        &self,
        username: &str,
        prompt: &ImagePrompt,
    ) -> Result<GeneratedImage, SessionError> {
        let session_arc = self.get_or_create(username).await;
        let client = {
            let session = session_arc.lock().await;
            session
                .clients
                .values()
                .find(|client| client.kind() == ModelKind::Image)
                .ok_or_else(|| SessionError::UnknownModel("image".to_string()))?
                .clone()
        };
        client
            .generate_image(prompt, username)
            .await
            .map_err(SessionError::Transport)
    }

    pub async fn save_preset(
        &self,
        username: &str,
        name: &str,
        text: &str,
    ) -> Result<(), String> {
        let session_arc = self.get_or_create(username).await;
        let mut session = session_arc.lock().await;
        session.catalog.save(&self.config, name, text)
    }

    pub async fn delete_preset(&self, username: &str, name: &str) -> Result<(), String> {
        let session_arc = self.get_or_create(username).await;
        let mut session = session_arc.lock().await;
        session.catalog.delete(&self.config, name)
    }

    /// Pops the user's oldest pending download, if any.
    pub async fn take_download(&self, username: &str) -> Option<PathBuf> {
        let session_arc = self.get_or_create(username).await;
        let mut session = session_arc.lock().await;
        session.take_download()
    }
}

async fn download_output(
    assistant: &AssistantClient,
    downloads_dir: &Path,
    file_id: &str,
    kind: &str,
) -> Result<PathBuf, TransportError> {
    let original_filename = if kind == "image" {
        None
    } else {
        Some(assistant.file_info(file_id).await?.filename)
    };
    let bytes = assistant.fetch_file(file_id).await?;

    if let Err(err) = tokio::fs::create_dir_all(downloads_dir).await {
        return Err(TransportError::Malformed(format!(
            "cannot create downloads directory {}: {err}",
            downloads_dir.display()
        )));
    }
    let path = downloads_dir.join(output_file_name(
        file_id,
        kind,
        original_filename.as_deref(),
    ));
    if let Err(err) = tokio::fs::write(&path, bytes).await {
        return Err(TransportError::Malformed(format!(
            "cannot write {}: {err}",
            path.display()
        )));
    }
    tracing::debug!(file = %path.display(), "saved assistant output");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::write_store;

    fn test_store(dir: &tempfile::TempDir) -> SessionStore {
        let config = Arc::new(write_store(dir));
        SessionStore::new(config, dir.path().join("downloads"))
    }

    #[tokio::test]
    async fn sessions_are_seeded_from_the_users_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let session_arc = store.get_or_create("alice").await;
        let session = session_arc.lock().await;

        let chat = session.conversation("GPT-3.5 Turbo").expect("conversation");
        assert_eq!(chat.system_text(), "alice default");
        assert_eq!(chat.len(), 1);

        // Alice has no Assistants preset, so the assistant tab falls back
        // to her default.
        let assistant = session.conversation("Assistants").expect("conversation");
        assert_eq!(assistant.system_text(), "alice default");

        assert!(session.client("GPT-4 Vision").is_some());
        assert!(session.history("GPT-3.5 Turbo").is_empty());
    }

    #[tokio::test]
    async fn assistant_tab_prefers_the_assistants_preset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        // bob rides the shared catalog, which has an Assistants entry.
        let session_arc = store.get_or_create("bob").await;
        let session = session_arc.lock().await;
        assert_eq!(
            session.conversation("Assistants").unwrap().system_text(),
            "shared assistant"
        );
        assert_eq!(
            session.conversation("GPT-3.5 Turbo").unwrap().system_text(),
            "shared default"
        );
    }

    #[tokio::test]
    async fn sessions_are_one_per_username() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let first = store.get_or_create("alice").await;
        let again = store.get_or_create("alice").await;
        let other = store.get_or_create("bob").await;
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn completed_outcomes_commit_the_whole_exchange() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let session_arc = store.get_or_create("alice").await;
        let mut session = session_arc.lock().await;

        let (_cancel, id) = session.begin_stream("GPT-3.5 Turbo");
        session.commit_outcome(
            "GPT-3.5 Turbo",
            id,
            Message::user("hi"),
            StreamOutcome::Completed("hello!".to_string()),
        );

        let conversation = session.conversation("GPT-3.5 Turbo").unwrap();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.completed_exchanges(), 1);
        let history = session.history("GPT-3.5 Turbo");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_turn, "hi");
        assert_eq!(history[0].assistant_turn, "hello!");
    }

    #[tokio::test]
    async fn failed_outcomes_leave_the_conversation_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let session_arc = store.get_or_create("alice").await;
        let mut session = session_arc.lock().await;

        let (_cancel, id) = session.begin_stream("GPT-3.5 Turbo");
        session.commit_outcome(
            "GPT-3.5 Turbo",
            id,
            Message::user("hi"),
            StreamOutcome::Failed("API Error: boom".to_string()),
        );

        // No half-written exchange is observable.
        assert_eq!(session.conversation("GPT-3.5 Turbo").unwrap().len(), 1);
        // The replay history still shows the diagnostic inline.
        let history = session.history("GPT-3.5 Turbo");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].assistant_turn, "API Error: boom");
    }

    #[tokio::test]
    async fn a_new_stream_cancels_and_supersedes_the_prior_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let session_arc = store.get_or_create("alice").await;
        let mut session = session_arc.lock().await;

        let (first_cancel, first_id) = session.begin_stream("GPT-3.5 Turbo");
        let (_second_cancel, second_id) = session.begin_stream("GPT-3.5 Turbo");
        assert!(first_cancel.is_cancelled());
        assert!(!session.stream_is_current("GPT-3.5 Turbo", first_id));
        assert!(session.stream_is_current("GPT-3.5 Turbo", second_id));

        // A superseded outcome commits nothing.
        session.commit_outcome(
            "GPT-3.5 Turbo",
            first_id,
            Message::user("stale"),
            StreamOutcome::Completed("stale answer".to_string()),
        );
        assert_eq!(session.conversation("GPT-3.5 Turbo").unwrap().len(), 1);
        assert!(session.history("GPT-3.5 Turbo").is_empty());
    }

    #[tokio::test]
    async fn streams_are_partitioned_by_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let session_arc = store.get_or_create("alice").await;
        let mut session = session_arc.lock().await;

        let (chat_cancel, chat_id) = session.begin_stream("GPT-3.5 Turbo");
        let (_vision_cancel, vision_id) = session.begin_stream("GPT-4 Vision");
        assert!(!chat_cancel.is_cancelled());
        assert!(session.stream_is_current("GPT-3.5 Turbo", chat_id));
        assert!(session.stream_is_current("GPT-4 Vision", vision_id));
    }

    #[tokio::test]
    async fn reset_restores_the_system_only_state_and_clears_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        {
            let session_arc = store.get_or_create("alice").await;
            let mut session = session_arc.lock().await;
            let (_cancel, id) = session.begin_stream("GPT-3.5 Turbo");
            session.commit_outcome(
                "GPT-3.5 Turbo",
                id,
                Message::user("hi"),
                StreamOutcome::Completed("hello!".to_string()),
            );
        }

        store.reset("alice", "GPT-3.5 Turbo").await.expect("reset");

        let session_arc = store.get_or_create("alice").await;
        let session = session_arc.lock().await;
        let conversation = session.conversation("GPT-3.5 Turbo").unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.system_text(), "alice default");
        assert!(session.history("GPT-3.5 Turbo").is_empty());
    }

    #[tokio::test]
    async fn downloads_queue_in_order_and_never_go_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        {
            let session_arc = store.get_or_create("alice").await;
            let mut session = session_arc.lock().await;
            session.push_download(PathBuf::from("/tmp/file-1.png"));
            session.push_download(PathBuf::from("/tmp/file-2.csv"));
        }

        assert_eq!(
            store.take_download("alice").await,
            Some(PathBuf::from("/tmp/file-1.png"))
        );
        assert_eq!(
            store.take_download("alice").await,
            Some(PathBuf::from("/tmp/file-2.csv"))
        );
        // Requesting again without a new file-ready event yields nothing,
        // not a stale path.
        assert_eq!(store.take_download("alice").await, None);
    }

    #[tokio::test]
    async fn submitting_to_an_unknown_or_wrong_kind_model_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);

        let unknown = store
            .submit_chat("alice", "GPT-9", "hi", None, Vec::new(), 300)
            .await;
        assert!(matches!(unknown, Err(SessionError::UnknownModel(_))));

        let wrong_kind = store
            .submit_chat("alice", "Dall-E-3", "hi", None, Vec::new(), 300)
            .await;
        assert!(matches!(wrong_kind, Err(SessionError::WrongKind { .. })));
    }

    #[tokio::test]
    async fn preset_mutations_flow_through_the_session_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);

        store
            .save_preset("alice", "terse", "回答要簡短。")
            .await
            .expect("save");
        {
            let session_arc = store.get_or_create("alice").await;
            let session = session_arc.lock().await;
            assert_eq!(session.catalog.get("terse"), Some("回答要簡短。"));
        }

        store.delete_preset("alice", "terse").await.expect("delete");
        {
            let session_arc = store.get_or_create("alice").await;
            let session = session_arc.lock().await;
            assert!(session.catalog.get("terse").is_none());
        }

        let guard = store.delete_preset("alice", "default").await;
        assert!(guard.is_err());
    }
}
