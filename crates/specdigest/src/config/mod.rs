pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_settings, load_settings_file, load_settings_from_str,
    load_settings_with, CONFIG_ENV,
};
pub use schema::{Environment, Settings};
