//! Gateway: HTTP surface for the bridge.
//!
//! `POST /raccoonai/send` routes an outbound message to a user's session, `GET /` is the
//! health probe and `GET /raccoonai/status` lists session snapshots.

mod protocol;
mod server;

pub use protocol::{OutboundPayload, StatusReport};
pub use server::{router, run_gateway, GatewayState};
