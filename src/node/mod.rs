pub mod cli;
pub mod config;
pub mod importer;
pub mod service_handle;

pub use cli::run_cli;
pub use config::ImporterConfig;
pub use importer::Importer;
pub use service_handle::ServiceHandle;
