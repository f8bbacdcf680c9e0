pub mod chat;
pub mod data_url;
pub mod events;
pub mod models;
pub mod results;
pub mod summary;
pub mod themes;
