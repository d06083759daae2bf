//! Domain entities

pub mod registration;
pub mod tool;

pub use registration::{ServerId, ServerRegistration, TransportConfig, TransportKind};
pub use tool::ToolInfo;
