pub mod adapters;
pub mod cipher;
pub mod dispatcher;
pub mod registry;
pub mod traits;
