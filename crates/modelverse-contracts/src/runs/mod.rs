mod files;
pub mod receipts;

pub use files::save_artifact;
