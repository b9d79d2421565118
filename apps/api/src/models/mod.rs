pub mod bucket;
pub mod document;
pub mod job;
pub mod tenant;
pub mod user;
