pub mod builder;
pub mod reply;
pub mod templates;
