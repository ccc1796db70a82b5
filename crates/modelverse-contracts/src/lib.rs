pub mod events;
pub mod jobs;
pub mod models;
pub mod requests;
pub mod runs;
