//! Webhook Intake (C2): an `actix-web` service that accepts provider-signed
//! push events and converts them into `GitRepo` resync triggers, replacing
//! the teacher's websocket-relay delivery with direct HTTP intake (spec
//! §4.2, §6 require provider-initiated delivery).

pub mod intake;
pub mod providers;
pub mod repo_match;
pub mod signature;

pub use intake::{webhook_scope, ParsedEvent, WebhookState};
