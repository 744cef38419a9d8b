pub mod config;
pub mod converter;
pub mod cover;
pub mod engine;
pub mod events;
pub mod fetcher;
pub mod job;
pub mod metrics;
pub mod naming;
pub mod placer;
pub mod postprocess;
pub mod retag;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ENV_PREFIX,
};
pub use converter::{AudioFormat, Converter, ConverterError, FfmpegConverter};
pub use engine::{CancelAck, DownloadEngine, EngineConfig, EngineError, PoolStatus, RetryConfig};
pub use events::{EventKind, EventPayload, EventSubscription, ProgressEvent};
pub use fetcher::{FetchError, Fetcher, Provider, SearchResult, SourceMetadata, SourceRef, YtDlpFetcher};
pub use retag::{retag, RetagError, RetagRequest};
pub use job::{
    CollisionPolicy, ErrorKind, Job, JobError, JobId, JobProgress, JobRequest, JobStatus,
    OutputProfile,
};
