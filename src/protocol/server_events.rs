use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::models::{ArbitraryJson, Response};
use crate::error::ServerError;

/// Events received from the realtime server, in arrival order.
///
/// Only the event types the controller reacts to are modeled; everything else
/// deserializes losslessly into `Unknown` and is ignored, so newly introduced
/// server event types never break the event loop.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Error {
        event_id: String,
        error: ServerError,
    },
    SessionCreated {
        event_id: String,
        /// The created session snapshot. Not inspected by the controller.
        session: ArbitraryJson,
    },
    SessionUpdated {
        event_id: String,
        session: ArbitraryJson,
    },
    ResponseDone {
        event_id: String,
        response: Response,
    },
    Unknown(ArbitraryJson),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        event_id: String,
        session: ArbitraryJson,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        event_id: String,
        session: ArbitraryJson,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        event_id: String,
        response: Response,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => {
                Self::SessionCreated { event_id, session }
            }
            ServerEventRepr::SessionUpdated { event_id, session } => {
                Self::SessionUpdated { event_id, session }
            }
            ServerEventRepr::ResponseDone { event_id, response } => {
                Self::ResponseDone { event_id, response }
            }
        }
    }
}

impl Serialize for ServerEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Unknown(value) => value.serialize(serializer),
            Self::Error { event_id, error } => ServerEventRepr::Error {
                event_id: event_id.clone(),
                error: error.clone(),
            }
            .serialize(serializer),
            Self::SessionCreated { event_id, session } => ServerEventRepr::SessionCreated {
                event_id: event_id.clone(),
                session: session.clone(),
            }
            .serialize(serializer),
            Self::SessionUpdated { event_id, session } => ServerEventRepr::SessionUpdated {
                event_id: event_id.clone(),
                session: session.clone(),
            }
            .serialize(serializer),
            Self::ResponseDone { event_id, response } => ServerEventRepr::ResponseDone {
                event_id: event_id.clone(),
                response: response.clone(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Unrecognized server event: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

impl ServerEvent {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Error { event_id, .. }
            | Self::SessionCreated { event_id, .. }
            | Self::SessionUpdated { event_id, .. }
            | Self::ResponseDone { event_id, .. } => Some(event_id.as_str()),
            Self::Unknown(value) => value.get("event_id").and_then(|v| v.as_str()),
        }
    }
}
