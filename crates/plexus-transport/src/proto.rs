//! Wire schema for the plugin RPC channel.
//!
//! Both directions speak the same two shapes: a [`MsgRequest`] carrying an
//! envelope's routing fields plus its JSON request body, and a
//! [`MsgResponse`] echoing the routing fields with the JSON response body.
//! The `error` key inside either body follows the empty-string ↔ absent
//! convention enforced by the envelope layer.

use serde::{Deserialize, Serialize};

use plexus_core::{Envelope, EnvelopeResult, JsonMap, Payload, Reply};

/// One unary request on the RPC channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ttl: i64,
    /// JSON-encoded request body.
    #[serde(default)]
    pub request: JsonMap,
}

impl MsgRequest {
    /// Serializes an envelope for the wire. The reply slot does not cross
    /// the boundary; lifecycle calls get their reply from the paired
    /// [`MsgResponse`] instead.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id().to_string(),
            from: envelope.from().to_string(),
            to: envelope.to().to_string(),
            kind: envelope.payload().kind().to_string(),
            ttl: envelope.ttl(),
            request: envelope.payload().to_wire(),
        }
    }

    /// Reconstructs the envelope on the receiving side.
    pub fn into_envelope(self) -> EnvelopeResult<Envelope> {
        let payload = Payload::from_wire(&self.kind, self.request)?;
        Ok(Envelope::from_wire_parts(
            self.id, self.from, self.to, self.ttl, payload,
        ))
    }
}

/// The unary response paired with a [`MsgRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// JSON-encoded response body.
    #[serde(default)]
    pub response: JsonMap,
}

impl MsgResponse {
    /// Builds the response for `request` out of a reply.
    pub fn for_request(request: &MsgRequest, reply: &Reply) -> Self {
        Self {
            id: request.id.clone(),
            from: request.from.clone(),
            to: request.to.clone(),
            kind: request.kind.clone(),
            response: reply.to_wire(),
        }
    }

    /// An empty-success response for `request`.
    pub fn empty(request: &MsgRequest) -> Self {
        Self::for_request(request, &Reply::ok())
    }

    /// Decodes the response body into a [`Reply`].
    pub fn into_reply(self) -> Reply {
        Reply::from_wire(self.response)
    }
}
