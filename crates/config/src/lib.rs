//! Configuration for the ebike-flow client.
//!
//! Every setting has a default matching the production Bosch eBike Flow
//! services, so running without a config file works.

pub mod loader;
pub mod schema;

pub use {
    loader::{ConfigError, config_dir, data_dir, find_config_file, load, load_from_file},
    schema::{ApiSettings, FlowConfig, OAuthSettings, PollSettings, StorageSettings},
};
