pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::{cli::LocalStorage, CliConfig, JobParams};
pub use core::{catalog::StacCatalog, engine::FetchEngine};
pub use utils::error::{FetchError, Result};
