pub mod config;
pub mod manager;


pub use config::{LayoutSettings, Settings, Tool};
pub use manager::SettingsManager;
