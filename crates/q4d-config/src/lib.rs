#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Configuration loading for the Q4D client.
//!
//! Layout: `model.rs` (typed settings), `loader.rs` (file + environment
//! overlay), `validate.rs` (field parsing and aggregation), `mapping.rs`
//! (category mapping file), `error.rs` (error types).

pub mod error;
pub mod loader;
pub mod mapping;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigIssue, ConfigResult};
pub use loader::{CONFIG_ENV_PREFIX, DEFAULT_CONFIG_FILE, load_config, load_config_with_env};
pub use mapping::{TypeMapping, load_type_mapping};
pub use model::{
    BusSettings, ClientConfig, DestinationSettings, DispatchSettings, LabelSettings,
    TransferSettings,
};
