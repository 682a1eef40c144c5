// Core moderation module - the full anti-link pipeline and its parts.
// Pure domain logic; the telegram layer adapts it to the platform.

pub mod bot_meta;
pub mod classifier;
pub mod escalation;
pub mod exemptions;
pub mod moderation_models;
pub mod pipeline;
pub mod policy_store;

pub use bot_meta::*;
pub use classifier::*;
pub use escalation::*;
pub use exemptions::*;
pub use moderation_models::*;
pub use pipeline::*;
pub use policy_store::*;
