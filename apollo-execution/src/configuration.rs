//! Engine configuration.

use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::CooperativeBackend;
use crate::backend::ExecutorBackend;
use crate::backend::InlineBackend;
use crate::backend::ProcessBackend;
use crate::backend::ThreadBackend;
use crate::error::ConfigurationError;

/// Configuration of an [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Where resolvers run
    /// default: inline
    #[serde(default)]
    pub backend: BackendConfiguration,

    /// Object nesting depth after which completion continues on a fresh task,
    /// 0 to never do so
    /// default: 64
    #[serde(default = "default_trampoline_depth")]
    pub trampoline_depth: usize,
}

fn default_trampoline_depth() -> usize {
    64
}

impl Default for Configuration {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(backend: Option<BackendConfiguration>, trampoline_depth: Option<usize>) -> Self {
        Self {
            backend: backend.unwrap_or_default(),
            trampoline_depth: trampoline_depth.unwrap_or_else(default_trampoline_depth),
        }
    }

    /// Parses YAML configuration.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// The executor backend to build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum BackendConfiguration {
    /// Resolvers run on the flow executing the operation.
    #[default]
    Inline,

    /// Every resolver runs on a Tokio task of its own.
    Cooperative,

    /// Resolvers run on OS threads.
    Thread {
        /// Size of the worker pool, 0 for one worker per core.
        /// Without it every resolver call gets a new thread.
        #[serde(default)]
        pool: Option<usize>,
    },

    /// Resolvers run in a worker process spawned per call.
    Process {
        /// The worker program.
        program: PathBuf,
        /// Its arguments.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl BackendConfiguration {
    /// Builds the configured backend.
    ///
    /// The cooperative backend, and the thread backends when resolvers answer
    /// with futures, use the Tokio runtime this is called from.
    pub fn build(&self) -> Result<Arc<dyn ExecutorBackend>, ConfigurationError> {
        Ok(match self {
            BackendConfiguration::Inline => Arc::new(InlineBackend),
            BackendConfiguration::Cooperative => Arc::new(CooperativeBackend::new()?),
            BackendConfiguration::Thread { pool: None } => Arc::new(ThreadBackend::dedicated()),
            BackendConfiguration::Thread { pool: Some(size) } => {
                Arc::new(ThreadBackend::pooled(*size)?)
            }
            BackendConfiguration::Process { program, args } => {
                Arc::new(ProcessBackend::new(program.clone()).args(args.iter().cloned()))
            }
        })
    }
}
