//! Shared types for the Promptlib prompt library.

mod conversation;
mod notification;
mod prompt;
mod session;
mod ws;

pub use conversation::*;
pub use notification::*;
pub use prompt::*;
pub use session::*;
pub use ws::*;
