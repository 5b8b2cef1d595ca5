pub mod config;
pub mod helpers;
pub mod key;
pub mod kubernetes;
pub mod resources;

pub const CONTROLLER_FIELD_MANAGER: &str = "cidr-sync-controller";
