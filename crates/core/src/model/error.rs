use crate::model::ModelProvider;
use std::fmt;

#[derive(Debug, Clone)]
pub struct ModelDiagnosticsError {
    pub provider: ModelProvider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl fmt::Display for ModelDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "demand model error (provider={:?}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for ModelDiagnosticsError {}
