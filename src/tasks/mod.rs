pub mod expiry;
pub(crate) mod scheduler;
