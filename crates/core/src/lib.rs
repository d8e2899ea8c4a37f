pub mod batch;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod orphan;
pub mod reconcile;
pub mod recycle;
pub mod snapshot;
pub mod testing;
pub mod torrent_client;

pub use batch::{group_by, ActionGroups};
pub use cache::{cached_call, CacheKey, CacheScope, CacheSettings, CacheStats, Lookup, RunCache, TtlCache};
pub use classifier::{PatternError, PatternRuleSet};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use error::ReconcileError;
pub use index::{covering_roots, ClaimedFileIndex};
pub use orphan::{scan, CandidateState, ExclusionRules, OrphanCandidate, ScanReport};
pub use reconcile::{CancelFlag, Reconciler, RunOutcome, RunSummary, Stage, StageReport};
pub use recycle::{MovedFile, RecycleBin, RecycleError, RecycleReason};
pub use snapshot::{fetch_snapshot, Snapshot};
pub use torrent_client::{QBittorrentClient, TorrentClient, TorrentClientError, TorrentRecord};
