pub mod canonical;
pub mod keys;
pub mod merkle;
