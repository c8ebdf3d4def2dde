use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A function call proposed by the model. `arguments` is the raw JSON text
/// the model produced; it is parsed only when the call is dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Position in the history that a turn can be rolled back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// In-memory chat history for one session. The system instructions are kept
/// apart from the messages so a reset never loses them.
#[derive(Clone, Debug)]
pub struct Conversation {
    id: Uuid,
    instructions: String,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), instructions: instructions.into(), messages: Vec::new() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Instructions first, then the history, as sent to the model.
    pub fn request_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if !self.instructions.trim().is_empty() {
            messages.push(ChatMessage::system(self.instructions.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_tool_result(&mut self, call_id: impl Into<String>, content: impl Into<String>) {
        self.messages.push(ChatMessage::tool_result(call_id, content));
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.messages.len())
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.messages.truncate(checkpoint.0);
    }

    /// Fresh, empty history under a new id.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.id = Uuid::new_v4();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, Conversation, Role, ToolCall};

    #[test]
    fn request_messages_lead_with_instructions() {
        let mut conversation = Conversation::new("Respond to user questions as an assistant");
        conversation.push_user("Hello");

        let messages = conversation.request_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], ChatMessage::user("Hello"));
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn rollback_discards_an_abandoned_turn() {
        let mut conversation = Conversation::new("be brief");
        conversation.push_user("first");
        conversation.push_assistant(ChatMessage::assistant("ok"));

        let checkpoint = conversation.checkpoint();
        conversation.push_user("second");
        conversation.push_assistant(ChatMessage::assistant_with_calls(
            None,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "lights-get_lights".to_string(),
                arguments: "{}".to_string(),
            }],
        ));
        conversation.rollback(checkpoint);

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[1], ChatMessage::assistant("ok"));
    }

    #[test]
    fn reset_clears_history_and_changes_id() {
        let mut conversation = Conversation::new("be brief");
        let original_id = conversation.id();
        conversation.push_user("hello");
        conversation.push_tool_result("call_1", "Operation was rejected.");

        conversation.reset();

        assert!(conversation.is_empty());
        assert_ne!(conversation.id(), original_id);
        assert_eq!(conversation.instructions(), "be brief");
        assert_eq!(conversation.request_messages().len(), 1);
    }

    #[test]
    fn tool_results_reference_their_call() {
        let message = ChatMessage::tool_result("call_9", "Design");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
        assert!(!message.has_tool_calls());
    }
}
