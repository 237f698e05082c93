//! Collections and the registry that owns them

mod models;
mod registry;

pub use models::*;
pub use registry::CollectionRegistry;
