//! Data acquisition: fetch capability, CSV source, and the download orchestrator.

pub mod csv_source;
pub mod download;
pub mod provider;

pub use csv_source::CsvFileFetcher;
pub use download::SeriesDownloader;
pub use provider::{AllMarkets, FetchError, FetchRequest, ReferenceData, SeriesFetcher};
