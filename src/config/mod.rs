pub mod settings;
pub mod sync_config;

pub use settings::{DeviceCredentials, FrappeSettings, Settings};
pub use sync_config::{ConfigStore, JsonFileStore, SyncConfig};
