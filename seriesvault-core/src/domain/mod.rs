//! Domain types: series identities, resolutions, write policies, data points.

pub mod point;
pub mod resolution;
pub mod series;

pub use point::DataPoint;
pub use resolution::{Resolution, WritePolicy};
pub use series::{Category, ResourceKey, SeriesId};
