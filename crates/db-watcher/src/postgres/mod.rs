//! PostgreSQL notification source.

mod listener;
mod session;

pub use listener::NotificationListener;
pub use session::{NotificationSession, PgSession};
