pub mod channel;
pub mod control;
pub mod filter;
pub mod progress;
pub mod reconciler;
pub mod store;
