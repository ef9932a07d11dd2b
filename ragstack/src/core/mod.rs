//! Core types: resource records, typed identifiers, targets and naming.

mod naming;
mod record;
mod target;

pub use naming::{
    date_stamp, location_constraint, select_latest, NamingConvention, DEFAULT_STORAGE_REGION,
};
pub use record::{normalize_id, DataSourcePair, ResourceKind, ResourceRecord, NESTED_STACK_TYPE};
pub use target::{StageName, StageTarget, TeardownTarget, UnknownTarget};
