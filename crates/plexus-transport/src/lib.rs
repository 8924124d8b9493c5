//! # Plexus Transport
//!
//! Wire plumbing for subprocess plugins: the frame codec, the RPC
//! client/server pair, the spawn-time handshake, and the dial-back broker.
//!
//! # Channel topology
//!
//! ```text
//!            primary channel (host dials)
//! ┌──────┐  Request(MsgRequest)→MsgResponse  ┌────────┐
//! │ host │──────────────────────────────────▶│ plugin │
//! │      │◀──────────────────────────────────│        │
//! └──────┘   callback channel (plugin dials   └────────┘
//!            back to the broker id from func_start)
//! ```
//!
//! Both channels carry the same unary shape; direction is fixed per
//! connection, which keeps correlation trivial: every request frame is
//! answered by exactly one response frame with the same sequence number.

pub mod broker;
pub mod client;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod proto;
pub mod server;

pub use broker::Broker;
pub use client::RpcClient;
pub use error::{HandshakeError, WireError, WireResult};
pub use frame::{Frame, MAX_FRAME_LEN, read_frame, write_frame};
pub use handshake::{COOKIE_KEY, COOKIE_VALUE, Handshake, PROTOCOL_VERSION, cookie_present};
pub use proto::{MsgRequest, MsgResponse};
pub use server::{RequestHandler, serve_connection};
