//! Wire bodies of the node-to-node endpoints
//!
//! `POST /message?session=<id>` carries a [`MessageBody`];
//! `POST /inquiry?session=<id>` carries an [`InquiryBody`]. The session
//! travels in the query string, never in the body.

use serde::{Deserialize, Serialize};

use crate::protocol::{MessageKind, ProtocolMessage, TransactionId};

/// Body of `POST /message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub message: MessageKind,
    /// Sender node id
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    #[serde(default)]
    pub subordinates: Vec<String>,
    pub trans_id: TransactionId,
}

impl MessageBody {
    pub fn from_message(message: &ProtocolMessage) -> Self {
        Self {
            message: message.kind,
            node: message.sender.clone(),
            coordinator: message.coordinator.clone(),
            subordinates: message.subordinates.clone(),
            trans_id: message.transaction_id,
        }
    }

    pub fn into_message(self, session: impl Into<String>) -> ProtocolMessage {
        ProtocolMessage::new(self.message, self.node, self.trans_id, session)
            .with_topology(self.coordinator, self.subordinates)
    }
}

/// Body of `POST /inquiry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryBody {
    pub sender: String,
    pub trans_id: TransactionId,
}

impl InquiryBody {
    pub fn from_message(message: &ProtocolMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            trans_id: message.transaction_id,
        }
    }

    pub fn into_message(self, session: impl Into<String>) -> ProtocolMessage {
        ProtocolMessage::new(MessageKind::Inquiry, self.sender, self.trans_id, session)
    }
}
