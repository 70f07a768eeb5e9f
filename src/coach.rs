//! Scripted coach: canned replies keyed by exact prompt text.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prompts offered to users as one-click questions.
pub const SUGGESTED_PROMPTS: [&str; 5] = [
    "Show me all made shots",
    "Analyze my misses",
    "How can I improve my shooting form?",
    "What patterns do you see in my movement?",
    "Compare first half to second half",
];

const FALLBACK_ACCURACY: &str = "62.5%";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClipReference {
    pub time: String,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Ai,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clips: Vec<ClipReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            clips: Vec::new(),
            video_id: None,
        }
    }
}

/// Append-only message log, user and coach turns in order. At most one
/// question is outstanding at a time.
#[derive(Clone, Debug)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    pending: bool,
    last_activity: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            pending: false,
            last_activity: Utc::now(),
        }
    }
}

impl Conversation {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// True while a question is waiting for its reply.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    fn push(&mut self, message: ChatMessage) {
        self.last_activity = message.timestamp;
        self.messages.push(message);
    }
}

type SharedConversation = Arc<RwLock<Conversation>>;

/// Live conversations keyed by id.
#[derive(Clone, Default)]
pub struct ConversationRegistry {
    conversations: Arc<RwLock<HashMap<Uuid, SharedConversation>>>,
}

impl ConversationRegistry {
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.conversations
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(Conversation::default())));
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedConversation> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Returns false for unknown ids.
    pub async fn remove(&self, id: &Uuid) -> bool {
        self.conversations.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Drops conversations idle for longer than `max_idle`. Conversations
    /// waiting on a reply are kept.
    pub async fn reap(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut conversations = self.conversations.write().await;

        let mut stale = Vec::new();
        for (id, conversation) in conversations.iter() {
            let log = conversation.read().await;
            let idle = (now - log.last_activity)
                .to_std()
                .map_or(false, |idle| idle > max_idle);
            if idle && !log.pending {
                stale.push(*id);
            }
        }
        for id in &stale {
            conversations.remove(id);
        }

        if !stale.is_empty() {
            info!("[coach] ✅ Reaped {} idle conversation(s)", stale.len());
        }
        stale.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoachReply {
    pub content: String,
    pub clips: Vec<ClipReference>,
}

fn clips(entries: &[(&str, &str)]) -> Vec<ClipReference> {
    entries
        .iter()
        .map(|(time, description)| ClipReference {
            time: time.to_string(),
            description: description.to_string(),
        })
        .collect()
}

/// Pure lookup; matching is exact and case-sensitive.
pub fn reply_for(query: &str) -> CoachReply {
    match query {
        "Show me all made shots" => CoachReply {
            content: "I found 15 made shots in this video. Here are the key moments where you successfully scored:".to_string(),
            clips: clips(&[
                ("1:24", "Clean three-pointer from the corner"),
                ("3:45", "Layup after a great drive"),
                ("5:12", "Mid-range jumper"),
                ("7:33", "And-one finish at the rim"),
            ]),
        },
        "Analyze my misses" => CoachReply {
            content: "Looking at your 9 missed shots, I notice a pattern. Most misses (6 out of 9) came from the left side of the court. Your release point seems slightly lower on these attempts.".to_string(),
            clips: clips(&[
                ("2:15", "Short on left corner three"),
                ("4:02", "Rushed shot off the dribble"),
                ("6:48", "Contested mid-range attempt"),
            ]),
        },
        "How can I improve my shooting form?" => CoachReply {
            content: [
                "Based on your video analysis, here are my recommendations:",
                "",
                "1. **Follow Through** - Your release is good, but hold your follow-through longer",
                "2. **Balance** - On left-side shots, ensure your feet are set before shooting",
                "3. **Arc** - Your three-pointers have a flatter trajectory - aim for higher arc",
                "4. **Elbow Alignment** - Keep your shooting elbow more tucked on jump shots",
            ]
            .join("\n"),
            clips: Vec::new(),
        },
        other => CoachReply {
            content: format!(
                "I've analyzed your question about \"{}\". Based on the video data, I can see interesting patterns in your gameplay. Your overall shooting accuracy is {}, with stronger performance in the second half. Would you like me to dive deeper into any specific aspect?",
                other, FALLBACK_ACCURACY
            ),
            clips: Vec::new(),
        },
    }
}

#[derive(Clone, Debug)]
pub struct CoachResponder {
    delay: Duration,
}

impl CoachResponder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Trims the query; whitespace-only input is rejected before any work is done.
    pub fn validate(query: &str) -> Result<&str> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyMessage);
        }
        Ok(trimmed)
    }

    /// Canned reply after the artificial thinking delay.
    pub async fn respond(&self, query: &str) -> Result<CoachReply> {
        let query = Self::validate(query)?;
        Ok(self.reply(query).await)
    }

    async fn reply(&self, query: &str) -> CoachReply {
        tokio::time::sleep(self.delay).await;
        reply_for(query)
    }

    /// Appends the user turn, waits for the reply and appends the coach turn.
    /// `context` is the id of the video the question is about.
    ///
    /// The reply is produced on its own task, so a caller that stops waiting
    /// never leaves a question without its answer.
    pub async fn ask(
        &self,
        conversation: SharedConversation,
        query: &str,
        context: Option<String>,
    ) -> Result<ChatMessage> {
        let query = Self::validate(query)?.to_string();
        {
            let mut log = conversation.write().await;
            if log.pending {
                return Err(Error::ReplyPending);
            }
            log.push(ChatMessage::new(ChatRole::User, query.clone()));
            log.pending = true;
        }
        debug!("[coach] 💬 Question: {}", query);

        let coach = self.clone();
        let log = conversation.clone();
        let task = tokio::spawn(async move {
            let reply = coach.reply(&query).await;

            let mut message = ChatMessage::new(ChatRole::Ai, reply.content);
            message.clips = reply.clips;
            message.video_id = context;

            let mut log = log.write().await;
            log.push(message.clone());
            log.pending = false;
            message
        });

        let message = match task.await {
            Ok(message) => message,
            Err(e) => {
                warn!("[coach] Reply task failed: {}", e);
                conversation.write().await.pending = false;
                return Err(Error::Internal(e.to_string()));
            }
        };

        info!(
            "[coach] ✅ Replied with {} clip(s){}",
            message.clips.len(),
            message
                .video_id
                .as_deref()
                .map(|id| format!(" about video {}", id))
                .unwrap_or_default()
        );
        Ok(message)
    }
}
