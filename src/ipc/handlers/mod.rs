pub mod attendance;
pub mod core;
pub mod recurring;
pub mod sessions;
pub mod setup;
