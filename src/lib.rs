pub mod catalog;
pub mod config;
pub mod context;
pub mod data_types;
pub mod query;
pub mod repository;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutils;
