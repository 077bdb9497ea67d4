//! CLI command implementations

mod config;
mod discovery;
mod forward;
mod resources;
mod status;

pub use config::{config_delete, config_export, config_import, config_list, config_show};
pub use discovery::{contexts_command, namespaces_command};
pub use forward::{start_command, stop_command};
pub use resources::{resources_cleanup, resources_delete, resources_list};
pub use status::status_command;
