#![forbid(unsafe_code)]

pub mod geolocation;
pub mod identity;
pub mod lifecycle;
pub mod subscription;
pub mod view;
