//! Binary model artifact: a fitted estimator plus everything inference needs
//! to reproduce the training-time feature layout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::metrics::Metrics;
use crate::models::Estimator;
use crate::preprocess::ScalingParams;

const MAGIC: &[u8; 4] = b"FRDM";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_name: String,
    /// Feature columns in the order the estimator expects them.
    pub feature_names: Vec<String>,
    /// Scalers fitted on the raw columns during preprocessing.
    pub scaling: ScalingParams,
    pub estimator: Estimator,
    /// Test-partition metrics recorded at training time.
    pub metrics: Option<Metrics>,
}

fn io_error(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::Serialization(format!("{}: {}", path.display(), err))
}

pub fn save(artifact: &ModelArtifact, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC).map_err(|e| io_error(path, e))?;
    writer
        .write_all(&FORMAT_VERSION.to_le_bytes())
        .map_err(|e| io_error(path, e))?;
    bincode::serialize_into(&mut writer, artifact)?;
    writer.flush().map_err(|e| io_error(path, e))?;

    info!(
        path = %path.display(),
        model = %artifact.model_name,
        family = artifact.estimator.family(),
        "saved model artifact"
    );
    Ok(())
}

pub fn load(path: &Path) -> Result<ModelArtifact> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 8];
    reader.read_exact(&mut header).map_err(|e| io_error(path, e))?;
    if &header[..4] != MAGIC {
        return Err(PipelineError::Serialization(format!(
            "{} is not a model artifact",
            path.display()
        )));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(PipelineError::Serialization(format!(
            "artifact format version {} is not supported (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let artifact: ModelArtifact = bincode::deserialize_from(&mut reader)?;
    info!(
        path = %path.display(),
        model = %artifact.model_name,
        features = artifact.feature_names.len(),
        "loaded model artifact"
    );
    Ok(artifact)
}
