//! HTTP transport
//!
//! Posts protocol messages to `<peer>/message` and inquiries to
//! `<peer>/inquiry`, with the session in the query string. Each send is
//! spawned onto the current tokio runtime and never awaited by the caller;
//! in-flight failures are logged and counted, nothing more.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::observability::{log_event, Event, MetricsRegistry};
use crate::protocol::{MessageKind, ProtocolMessage};

use super::errors::{TransportError, TransportResult};
use super::wire::{InquiryBody, MessageBody};
use super::Transport;

pub struct HttpTransport {
    client: reqwest::Client,
    metrics: Arc<MetricsRegistry>,
}

impl HttpTransport {
    /// Builds a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration, metrics: Arc<MetricsRegistry>) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ClientCreationFailed(e.to_string()))?;
        Ok(Self { client, metrics })
    }

    /// Endpoint on `peer` that accepts `kind`
    pub fn endpoint(peer: &str, kind: MessageKind) -> String {
        let path = match kind {
            MessageKind::Inquiry => "inquiry",
            _ => "message",
        };
        format!("{}/{}", peer.trim_end_matches('/'), path)
    }

    fn request(&self, target: &str, message: &ProtocolMessage) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(Self::endpoint(target, message.kind))
            .query(&[("session", message.session.as_str())]);
        match message.kind {
            MessageKind::Inquiry => builder.json(&InquiryBody::from_message(message)),
            _ => builder.json(&MessageBody::from_message(message)),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, target: &str, message: &ProtocolMessage) -> TransportResult<()> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let request = self.request(target, message);

        let metrics = self.metrics.clone();
        let peer = target.to_string();
        let session = message.session.clone();
        let kind = message.kind;

        runtime.spawn(async move {
            let result = match request.send().await {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(TransportError::Status {
                    peer: peer.clone(),
                    status: response.status().as_u16(),
                }),
                Err(e) => Err(TransportError::Request(e.to_string())),
            };
            if let Err(err) = result {
                metrics.increment_send_failures();
                log_event(
                    Event::SendFailed,
                    &[
                        ("session", &session),
                        ("message", kind.as_str()),
                        ("peer", &peer),
                        ("error", &err.to_string()),
                    ],
                );
            }
        });

        Ok(())
    }
}
