//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum steps running at once within a wave.
    pub max_parallelism: usize,

    /// Per-step deadline. `None` lets steps run unbounded.
    pub step_timeout: Option<Duration>,

    /// Per-compensation deadline.
    pub compensation_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            step_timeout: Some(Duration::from_secs(30)),
            compensation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.max_parallelism == 0 {
            return Err(WorkflowError::Configuration(
                "max_parallelism must be at least 1".into(),
            ));
        }
        if self.step_timeout.is_some_and(|t| t.is_zero())
            || self.compensation_timeout.is_some_and(|t| t.is_zero())
        {
            return Err(WorkflowError::Configuration(
                "timeouts must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}
