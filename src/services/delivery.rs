use std::sync::Arc;

use crate::backend::{Backends, MessageRow, MessageStore, NewMessage, SendEndpoint};
use crate::services::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The application endpoint, which also fans out notifications.
    Primary,
    /// A direct insert into the message store.
    Fallback,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Fallback => "fallback",
        }
    }
}

/// A message the backend accepted, with the stored row when the channel echoed it.
#[derive(Debug)]
pub struct Delivered {
    pub channel: Channel,
    pub row: Option<MessageRow>,
}

/// Sends a message through the primary endpoint, falling back to the store.
#[derive(Clone)]
pub struct Dispatcher {
    endpoint: Arc<dyn SendEndpoint>,
    store: Arc<dyn MessageStore>,
}

impl Dispatcher {
    pub fn new(endpoint: Arc<dyn SendEndpoint>, store: Arc<dyn MessageStore>) -> Self {
        Self { endpoint, store }
    }

    pub fn from_backends(backends: &Backends) -> Self {
        Self::new(backends.send_endpoint.clone(), backends.messages.clone())
    }

    pub async fn deliver(&self, message: &NewMessage) -> Result<Delivered, ChatError> {
        let primary = match self.endpoint.send(message).await {
            Ok(row) => {
                return Ok(Delivered {
                    channel: Channel::Primary,
                    row,
                })
            }
            Err(e) => ChatError::SendPrimary(e),
        };
        tracing::warn!("{}; falling back to direct insert", primary);

        match self.store.insert(message).await {
            Ok(row) => Ok(Delivered {
                channel: Channel::Fallback,
                row,
            }),
            Err(fallback) => {
                let error = ChatError::SendFallback {
                    primary: Box::new(primary),
                    fallback,
                };
                tracing::error!("{}", error);
                Err(error)
            }
        }
    }
}
