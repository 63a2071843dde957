//! Sample-sheet management and logged execution of external amplicon tools.

pub mod app;
pub mod config;
pub mod error;
pub mod fasta;
pub mod fs_util;
pub mod job;
pub mod logscan;
pub mod output;
pub mod pairing;
pub mod sample;
pub mod sanitize;
pub mod tabular;
pub mod usearch;
