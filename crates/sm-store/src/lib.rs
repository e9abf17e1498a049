pub mod config;
pub mod error;
pub mod files;
pub mod schema;
pub mod store;

pub use config::{database_path, default_data_dir, load_config, resolve_data_dir};
pub use error::{Result, StoreError};
pub use files::{export_file, import_file};
pub use store::Store;
