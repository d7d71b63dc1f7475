mod file;

pub use file::{
    load_config, load_config_from, EngineConfig, EngineSection, LogsSection, NotificationsSection,
    SshSection, TasksSection,
};
