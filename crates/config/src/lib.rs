//! Configuration loading for mnemo: `mnemo.toml` discovery, parsing and
//! environment overrides.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        CONFIG_FILE_NAME, ConfigError, config_dir, data_dir, discover, load,
        load_from,
    },
    schema::{EmbeddingsConfig, EmbeddingsProvider, EmptyDocument, MemorySection, MnemoConfig},
};
