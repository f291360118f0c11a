pub mod api;
pub mod config;
pub mod errors;
pub mod feeds;
pub mod hub;
pub mod live;
pub mod models;
pub mod storage;
pub mod sync;
pub mod util;
