//! Abstractions over the places trip files are listed and read from.

pub mod trip_source;
