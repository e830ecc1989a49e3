pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, HeaderRename, IntentColumnsConfig, LogConfig, PhoneConfig, PhoneTarget,
    RolloverConfig, StoreConfig, TableNames,
};
