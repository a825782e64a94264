/// Process and process step domain models
pub mod process;

/// Repository interfaces
pub mod repository;
