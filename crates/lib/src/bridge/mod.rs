//! Bridge to the Raccoon service: webhook forwarding of inbound messages and the
//! integrations listing that decides which users get sessions.

mod forwarder;
mod integrations;
mod pipeline;

pub use forwarder::{ForwardResult, Forwarder, WEBHOOK_TIMEOUT};
pub use integrations::{Integration, IntegrationMetadata, IntegrationsClient, IntegrationsError};
pub use pipeline::WebhookPipeline;
