//! Destinations for streamed variable records

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::common::{Error, Result};

use super::variable::EnhancedVariable;

/// Receives one record per top-level variable
#[async_trait]
pub trait VariableSink: Send {
    /// Write one record, returning the bytes written
    async fn write(&mut self, variable: &EnhancedVariable) -> Result<usize>;

    async fn finish(&mut self) -> Result<()>;

    /// Where the records end up, for reporting
    fn location(&self) -> PathBuf;
}

/// One JSON document per line
pub struct JsonlFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlFileSink {
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await.map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }
}

/// Serialize `variable` as a newline-terminated JSON line
pub fn encode_line(variable: &EnhancedVariable) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(variable)?;
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl VariableSink for JsonlFileSink {
    async fn write(&mut self, variable: &EnhancedVariable) -> Result<usize> {
        let line = encode_line(variable)?;
        self.writer.write_all(&line).await?;
        Ok(line.len())
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}
