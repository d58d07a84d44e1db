pub mod reconciler;
pub mod store;
pub mod sweeper;
