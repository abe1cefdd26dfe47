pub mod concurrency;
pub mod recovery;
pub mod transaction;
