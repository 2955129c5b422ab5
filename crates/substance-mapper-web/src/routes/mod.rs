pub mod envelope;
pub mod mapping;
pub mod review;
pub mod status;
