//! Generic tabular layer: frames of typed cells plus the relational
//! operations the pipeline composes (flatten, rename, join, group,
//! resample). Nothing in here knows about sonar collections; the domain
//! pipeline in [`crate::transform`] wires these together.

pub mod flatten;
pub mod group;
pub mod join;
pub mod types;

pub use flatten::flatten_collection;
pub use group::{count_by, mean_by, monthly_mean, parse_timestamp, parse_timestamp_strict};
pub use join::{inner_join, left_join};
pub use types::{Cell, Frame, Row};
