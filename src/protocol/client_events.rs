use serde::{Deserialize, Serialize};

use super::models::{Item, ResponseConfig, SessionUpdate};

/// Events this client sends over the transport channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionUpdate>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Box<Item>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Box<ResponseConfig>>,
    },
}

impl ClientEvent {
    #[must_use]
    pub fn session_update(session: SessionUpdate) -> Self {
        Self::SessionUpdate {
            event_id: None,
            session: Box::new(session),
        }
    }

    #[must_use]
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(Item::user_message(text)),
        }
    }

    #[must_use]
    pub fn response_with_instructions(instructions: impl Into<String>) -> Self {
        Self::ResponseCreate {
            event_id: None,
            response: Some(Box::new(ResponseConfig {
                instructions: Some(instructions.into()),
            })),
        }
    }
}
