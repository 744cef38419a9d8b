use serde::{Deserialize, Serialize};

use crate::converter::ConverterConfig;
use crate::engine::EngineConfig;
use crate::fetcher::FetcherConfig;
use crate::job::OutputProfile;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    /// Output profile used when a request does not bring its own.
    #[serde(default)]
    pub defaults: OutputProfile,
}
