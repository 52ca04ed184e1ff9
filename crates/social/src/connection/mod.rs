//! Connection lifecycle: authorization, token upkeep, disconnect

mod manager;

pub use manager::{AuthorizationStart, ConnectionManager};
