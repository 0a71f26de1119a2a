// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    expand_path, initialize, load_config, resolve_cache_path, run_summary, write_report,
};

// Re-export pipeline entry points from catwalk-core
pub use catwalk_core::pipeline::{
    PipelineOptions, PipelineProgressCallback, discover_tree, execute_pipeline,
};
