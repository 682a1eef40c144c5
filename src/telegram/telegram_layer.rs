// Telegram layer - port implementations, commands, and the dispatcher.

#[path = "commands.rs"]
pub mod commands;
#[path = "events.rs"]
pub mod events;
#[path = "timers.rs"]
pub mod timers;
#[path = "transport.rs"]
pub mod transport;
