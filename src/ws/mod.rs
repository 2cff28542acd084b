pub mod handler;
pub mod outbox;
pub mod protocol;
pub mod session;
