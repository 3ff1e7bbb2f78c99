pub mod aggregator;
pub mod config;
pub mod download;
pub mod fetch;
pub mod infra;
pub mod inspector;
pub mod lister;
pub mod metadata;
pub mod normalize;
pub mod output;
pub mod parquet_footer;
pub mod sample;
pub mod services;
pub mod trip_file;
pub mod zones;
