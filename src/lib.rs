pub mod config;
pub mod diff;
pub mod disambiguate;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fs_util;
pub mod orchestrator;
pub mod output;
pub mod query;
pub mod snapshot;
pub mod species;
pub mod store;
pub mod synonyms;
pub mod table;
pub mod uniprot;
