//! Messenger (§3 "Message", §4.10)
//!
//! Agent-to-agent inbox: `register` gives an agent an inbox, `send` delivers
//! synchronously, `broadcast` fans out to everyone but the sender.
//! `request_help` allocates a `correlationId` and resolves once a matching
//! `HelpResponse` lands in the requester's own inbox, or times out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HelpRequest,
    HelpResponse,
    TaskDelegation,
    InformationShare,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub from: String,
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: Value,
    pub correlation_id: Option<String>,
    pub priority: u8,
    pub created_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("recipient not registered: {0}")]
    UnknownRecipient(String),
    #[error("help request timed out after {0}ms")]
    Timeout(u64),
}

struct PendingHelp {
    tx: oneshot::Sender<Message>,
}

struct Inbox {
    messages: Mutex<Vec<Message>>,
}

pub struct Messenger {
    inboxes: RwLock<HashMap<String, Arc<Inbox>>>,
    pending: Mutex<HashMap<String, PendingHelp>>,
    default_timeout_ms: u64,
}

impl Messenger {
    pub fn new() -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            default_timeout_ms: 30_000,
        }
    }

    pub fn register(&self, agent_id: &str) {
        self.inboxes
            .write()
            .unwrap()
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Inbox { messages: Mutex::new(Vec::new()) }));
    }

    pub fn send(&self, msg: Message) -> Result<(), MessengerError> {
        let to = msg.to.clone().ok_or_else(|| MessengerError::UnknownRecipient("<none>".into()))?;
        self.deliver(&to, msg)
    }

    fn deliver(&self, to: &str, msg: Message) -> Result<(), MessengerError> {
        if msg.kind == MessageType::HelpResponse {
            if let Some(correlation_id) = &msg.correlation_id {
                let mut pending = self.pending.lock().unwrap();
                if let Some(p) = pending.remove(correlation_id) {
                    let _ = p.tx.send(msg.clone());
                }
            }
        }
        let inbox = {
            let inboxes = self.inboxes.read().unwrap();
            inboxes.get(to).cloned()
        };
        match inbox {
            Some(inbox) => {
                inbox.messages.lock().unwrap().push(msg);
                Ok(())
            }
            None => Err(MessengerError::UnknownRecipient(to.to_string())),
        }
    }

    pub fn broadcast(&self, from: &str, content: Value, created_at: i64) {
        let ids: Vec<String> = {
            let inboxes = self.inboxes.read().unwrap();
            inboxes.keys().filter(|id| id.as_str() != from).cloned().collect()
        };
        for to in ids {
            let msg = Message {
                message_id: format!("msg-{}", uuid::Uuid::new_v4().simple()),
                from: from.to_string(),
                to: Some(to.clone()),
                kind: MessageType::Broadcast,
                content: content.clone(),
                correlation_id: None,
                priority: 0,
                created_at,
            };
            let _ = self.deliver(&to, msg);
        }
    }

    pub fn inbox_for(&self, agent_id: &str) -> Vec<Message> {
        self.inboxes
            .read()
            .unwrap()
            .get(agent_id)
            .map(|i| i.messages.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Sends a `HelpRequest` from `from` to `to` and awaits a `HelpResponse`
    /// sharing its `correlationId`, or times out after `timeout_ms`
    /// (defaults to 30s).
    pub async fn request_help(
        &self,
        from: &str,
        to: &str,
        content: Value,
        created_at: i64,
        timeout_ms: Option<u64>,
    ) -> Result<Message, MessengerError> {
        let correlation_id = format!("corr-{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(correlation_id.clone(), PendingHelp { tx });

        let msg = Message {
            message_id: format!("msg-{}", uuid::Uuid::new_v4().simple()),
            from: from.to_string(),
            to: Some(to.to_string()),
            kind: MessageType::HelpRequest,
            content,
            correlation_id: Some(correlation_id.clone()),
            priority: 0,
            created_at,
        };
        self.deliver(to, msg)?;

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.default_timeout_ms));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.pending.lock().unwrap().remove(&correlation_id);
                Err(MessengerError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Replies to a pending help request; delivers through the normal inbox
    /// path and also resolves the waiting `request_help` future.
    pub fn respond_help(
        &self,
        from: &str,
        to: &str,
        correlation_id: &str,
        content: Value,
        created_at: i64,
    ) -> Result<(), MessengerError> {
        let msg = Message {
            message_id: format!("msg-{}", uuid::Uuid::new_v4().simple()),
            from: from.to_string(),
            to: Some(to.to_string()),
            kind: MessageType::HelpResponse,
            content,
            correlation_id: Some(correlation_id.to_string()),
            priority: 0,
            created_at,
        };
        self.deliver(to, msg)
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}
