pub mod chat;
pub mod visit;
