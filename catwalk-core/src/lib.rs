pub mod cache;
pub mod config;
pub mod pipeline;
pub mod qc;
pub mod report;

pub use cache::SqliteCache;
pub use config::CatwalkConfig;
pub use pipeline::{PipelineOptions, execute_pipeline};
pub use report::RunReport;
