pub mod admin;

pub use admin::{admin_key_layer, is_admin_key};
