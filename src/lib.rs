pub mod assemble;
pub mod cache;
pub mod catalog;
pub mod census;
pub mod config;
pub mod convert;
pub mod crs;
pub mod domain;
pub mod error;
pub mod etl;
pub mod features;
pub mod fs_util;
pub mod index;
pub mod layout;
pub mod output;
pub mod source;
pub mod writer;
