//! Shared Types

pub mod jid;
pub mod phone;
pub mod presence;

pub use jid::*;
pub use phone::*;
pub use presence::*;
