use crate::config::prompt::{ get_chat_prompt, ChatPromptOptions, SharedPrompts };
use crate::history::{ ConversationStore, SessionLocks, StorageError };
use crate::llm::chat::ChatClient;
use crate::llm::LlmError;
use crate::models::chat::{ ChatResponse, SessionSummary, Turn };

use log::{ error, info };
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] LlmError),
}

/// The "digital twin": a persona-driven chat whose transcript persists per session.
#[derive(Clone)]
pub struct TwinAgent {
    chat_client: Arc<dyn ChatClient>,
    store: ConversationStore,
    locks: SessionLocks,
    prompts: SharedPrompts,
    options: ChatPromptOptions,
}

impl TwinAgent {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        store: ConversationStore,
        prompts: SharedPrompts,
        options: ChatPromptOptions
    ) -> Self {
        Self {
            chat_client,
            store,
            locks: SessionLocks::new(),
            prompts,
            options,
        }
    }

    pub fn storage_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Runs one exchange: the stored transcript gains exactly one user and one
    /// assistant turn, or nothing at all if any step fails.
    pub async fn chat(
        &self,
        message: &str,
        session_id: Option<String>
    ) -> Result<ChatResponse, AgentError> {
        if message.trim().is_empty() {
            return Err(AgentError::Validation("message must not be empty".into()));
        }
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        crate::history::validate_session_id(&session_id)?;

        let _guard = self.locks.acquire(&session_id).await;
        let mut conversation = self.store.load(&session_id).await?;

        let persona = self.prompts.read().await.persona.clone();
        let prompt = get_chat_prompt(&persona, &conversation, message, &self.options);

        let reply = self.chat_client
            .complete(&prompt).await
            .map_err(|e| {
                error!("Model call failed for session {}: {}", session_id, e);
                e
            })?
            .response.trim()
            .to_string();
        if reply.is_empty() {
            return Err(AgentError::Model(LlmError::EmptyResponse));
        }

        conversation.push(Turn::user(message));
        conversation.push(Turn::assistant(reply.clone()));
        self.store.save(&session_id, &conversation).await?;
        info!("Session {} now has {} turns", session_id, conversation.len());

        Ok(ChatResponse {
            response: reply,
            session_id,
        })
    }

    pub async fn conversation(&self, session_id: &str) -> Result<Vec<Turn>, AgentError> {
        Ok(self.store.load(session_id).await?)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, AgentError> {
        Ok(self.store.list_sessions().await?)
    }
}
