#![forbid(unsafe_code)]

pub mod complaints;
pub mod feed;
pub mod journal;
pub mod repo;
