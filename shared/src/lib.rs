//! Types shared by the overlay engine and its collaborators: the error
//! taxonomy, reserved names and status codes, and the persisted hive records.

pub mod constants;
pub mod errors;
pub mod records;
