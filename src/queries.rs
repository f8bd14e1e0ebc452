pub mod counselors;
pub mod messages;
pub mod payments;
pub mod ratings;
pub mod requests;
pub mod sessions;
