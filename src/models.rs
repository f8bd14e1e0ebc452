pub mod catalog;
pub mod counselors;
pub mod identity;
pub mod messages;
pub mod payments;
pub mod ratings;
pub mod requests;
pub mod sessions;
pub mod websocket;
