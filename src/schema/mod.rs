//! Schema management: introspection, the dynamic hardware audit tables and
//! the modification tracker.

pub mod hardware;
pub mod introspect;
pub mod tracker;

pub use hardware::{HardwareAttribute, HardwareClass, HardwareSchema, Scope};
pub use introspect::{TableMap, get_table_creation_options, get_tables};
pub use tracker::ModificationTracker;
