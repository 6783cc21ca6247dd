// src/runner/artifacts.rs

//! Per-run temporary artifacts: the staged output-schema file and the path
//! the agent writes its final artifact to.
//!
//! The directory is released when the value drops, which covers every exit
//! path of a run (success, failure, panic unwinding).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::runner::prompt::result_schema_value;

pub struct RunArtifacts {
    dir: TempDir,
    schema_path: PathBuf,
    output_path: PathBuf,
}

impl RunArtifacts {
    /// Create the scratch directory and write the schema artifact into it.
    pub fn stage() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("scoutbatch-")
            .tempdir()
            .context("creating run scratch directory")?;

        let schema_path = dir.path().join("result.schema.json");
        let schema = serde_json::to_vec_pretty(&result_schema_value())
            .context("serializing result schema")?;
        std::fs::write(&schema_path, schema)
            .with_context(|| format!("writing schema artifact at {schema_path:?}"))?;

        let output_path = dir.path().join("final.json");

        Ok(Self {
            dir,
            schema_path,
            output_path,
        })
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Best-effort read of the agent's final artifact. Absence or
    /// unreadability is not itself fatal; classification happens upstream.
    pub fn read_final_output(&self) -> Option<String> {
        match std::fs::read_to_string(&self.output_path) {
            Ok(text) => Some(text),
            Err(_) => None,
        }
    }

    #[cfg(test)]
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_writes_a_parsable_schema() {
        let artifacts = RunArtifacts::stage().unwrap();
        let text = std::fs::read_to_string(artifacts.schema_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "object");
        assert!(artifacts.output_path().starts_with(artifacts.scratch_dir()));
    }

    #[test]
    fn missing_final_output_reads_as_none() {
        let artifacts = RunArtifacts::stage().unwrap();
        assert!(artifacts.read_final_output().is_none());
    }

    #[test]
    fn scratch_dir_is_released_on_drop() {
        let path;
        {
            let artifacts = RunArtifacts::stage().unwrap();
            path = artifacts.scratch_dir().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
