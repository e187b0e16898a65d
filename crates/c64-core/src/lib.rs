pub mod chat;
pub mod format;
pub mod petscii;

pub use chat::{Badge, ChatMessage, Fragment, ReplyRef, UserRole};
pub use format::{Formatter, PetsciiFormatter, TERMINAL_REVISION};
