pub mod batch;
pub mod keys;
pub mod prompt;
pub mod records;
pub mod runs;
