pub mod cache;
pub mod category;
pub mod error;
pub mod exclusion;
pub mod extract;
pub mod fetch;
pub mod layout;
pub mod normalize;
pub mod orchestrator;
pub mod pagination;
pub mod record;

pub use cache::{KeyedLocks, MemoryCache, RecordCache};
pub use category::CategoryTreeBuilder;
pub use error::{FetchError, Result, ScanError};
pub use exclusion::{EntityKind, Exclusions};
pub use extract::{FieldExtractor, SelectorExtractor};
pub use fetch::{HttpFetcher, Politeness, RetryPolicy};
pub use layout::{Link, SelectorLayout, SiteLayout};
pub use normalize::{ProductRef, normalize_url};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProgressCallback, RunOutcome, RunStats};
pub use pagination::{Collection, PaginationCollector};
pub use record::{CacheEntry, CategoryNode, ContentFingerprint, FetchFailure, Fields, ProductRecord};
