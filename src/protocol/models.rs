use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "gpt-realtime";

/// JSON Schema / tool parameter definitions are intentionally untyped.
pub type JsonSchema = Value;

/// Free-form JSON payloads where the protocol is open-ended.
pub type ArbitraryJson = Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Incomplete,
}

/// The named output voices the assistant can speak with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceId {
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
    #[default]
    Marin,
}

impl VoiceId {
    pub const ALL: [Self; 7] = [
        Self::Alloy,
        Self::Echo,
        Self::Fable,
        Self::Onyx,
        Self::Nova,
        Self::Shimmer,
        Self::Marin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
            Self::Marin => "marin",
        }
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoiceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|voice| voice.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidSettings(format!("unknown voice: {s}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
}

/// A conversation or response output item.
///
/// Items beyond the kinds this client inspects (user messages it creates,
/// `function_call` entries it scans for) deserialize into `Unknown` so an
/// unrecognized item in a `response.done` output list never poisons the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Message {
        id: Option<String>,
        status: Option<ItemStatus>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: Option<String>,
        /// Raw JSON text as produced by the model; parsed and validated by the
        /// tool layer, not here.
        arguments: String,
    },
    Unknown(ArbitraryJson),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemRepr {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        arguments: String,
    },
}

impl From<ItemRepr> for Item {
    fn from(repr: ItemRepr) -> Self {
        match repr {
            ItemRepr::Message { id, status, role, content } => {
                Self::Message { id, status, role, content }
            }
            ItemRepr::FunctionCall { id, status, name, call_id, arguments } => {
                Self::FunctionCall { id, status, name, call_id, arguments }
            }
        }
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Message { id, status, role, content } => ItemRepr::Message {
                id: id.clone(),
                status: *status,
                role: *role,
                content: content.clone(),
            }
            .serialize(serializer),
            Self::FunctionCall { id, status, name, call_id, arguments } => {
                ItemRepr::FunctionCall {
                    id: id.clone(),
                    status: *status,
                    name: name.clone(),
                    call_id: call_id.clone(),
                    arguments: arguments.clone(),
                }
                .serialize(serializer)
            }
            Self::Unknown(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ItemRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(_) => Ok(Self::Unknown(value)),
        }
    }
}

impl Item {
    /// Convenience constructor for a user text message.
    #[must_use]
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::Message {
            id: None,
            status: None,
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Realtime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// JSON Schema for tool parameters (intentionally untyped).
        parameters: JsonSchema,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputAudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputAudioConfig>,
}

/// Payload of an outbound `session.update`. Only the fields being changed are
/// serialized; the server merges them into the live session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionUpdate {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<SessionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
}

impl SessionUpdate {
    /// A `session.update` that only changes the output voice.
    #[must_use]
    pub fn voice(voice: VoiceId) -> Self {
        Self {
            audio: Some(AudioConfig {
                output: Some(OutputAudioConfig { voice: Some(voice) }),
            }),
            ..Self::default()
        }
    }

    /// A `session.update` that only changes the instructions.
    #[must_use]
    pub fn instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            ..Self::default()
        }
    }
}

/// Payload of an outbound `response.create`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
    Incomplete,
}

/// The response object carried by `response.done`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<Item>>,
}
