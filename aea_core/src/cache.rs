//! # Artifact Cache
//!
//! Content-addressed store of stage results. One artifact per
//! `(scope, stage)` lives in the cache directory:
//!
//! ```text
//! {dir}/{title}.calculo{STAGE}.{fingerprint}.json
//! {dir}/{title}.calculo{STAGE}.{fingerprint}.{suffix}.png
//! {dir}/{title}.calculo{STAGE}.{fingerprint}.{suffix}.svg
//! {dir}/{family}/{member}/...            (family members)
//! ```
//!
//! An artifact is *vigent* when its fingerprint equals the one computed
//! from the current document. Recomputation is decided by fingerprint
//! inequality only, never by timestamps.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::calculations::Stage;
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};
use crate::file_io::{read_json, validate_version, write_atomic, write_json_atomic, SCHEMA_VERSION};
use crate::fingerprint::{config_subset, fingerprint, ExternalInputs, Scope};
use crate::render::Drawing;

/// Persisted result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub version: String,
    pub stage: Stage,
    pub title: String,
    /// Fingerprint scope prefix
    pub scope: String,
    pub fingerprint: String,
    pub created: DateTime<Utc>,
    /// The document keys the stage read
    pub config_snapshot: Value,
    pub payload: Value,
    /// File names of the PNG drawings and their SVG companions
    #[serde(default)]
    pub images: Vec<String>,
}

impl Artifact {
    /// Decode the payload into the stage's result type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> CalcResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| CalcError::SerializationError {
            reason: format!("artifact {} of '{}': {}", self.stage, self.title, e),
        })
    }
}

/// Cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Cache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the artifacts of `scope`.
    pub fn dir_for(&self, scope: &Scope) -> PathBuf {
        match &scope.family {
            Some((family, member)) => self.root.join(safe_name(family)).join(safe_name(member)),
            None => self.root.clone(),
        }
    }

    fn prefix(scope: &Scope, stage: Stage) -> String {
        format!("{}.calculo{}.", safe_name(&scope.title), stage.code())
    }

    pub fn artifact_path(&self, scope: &Scope, stage: Stage, fingerprint: &str) -> PathBuf {
        self.dir_for(scope)
            .join(format!("{}{}.json", Self::prefix(scope, stage), fingerprint))
    }

    pub fn image_path(&self, scope: &Scope, stage: Stage, fingerprint: &str, suffix: &str, ext: &str) -> PathBuf {
        self.dir_for(scope)
            .join(image_name(scope, stage, fingerprint, suffix, ext))
    }

    /// Artifact file names of `(scope, stage)` currently on disk.
    fn artifact_files(&self, scope: &Scope, stage: Stage) -> Vec<PathBuf> {
        let prefix = Self::prefix(scope, stage);
        let Ok(entries) = fs::read_dir(self.dir_for(scope)) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(prefix.as_str()))
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .is_some_and(|fp| !fp.is_empty() && fp.chars().all(|c| c.is_ascii_hexdigit()))
            })
            .collect();
        files.sort();
        files
    }

    /// Most recent artifact of `(scope, stage)`, vigent or not.
    ///
    /// Unreadable or incompatible artifacts count as absent.
    pub fn load(&self, stage: Stage, scope: &Scope) -> Option<Artifact> {
        self.artifact_files(scope, stage)
            .into_iter()
            .filter_map(|path| match read_artifact(&path) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable artifact");
                    None
                }
            })
            .max_by_key(|a| a.created)
    }

    /// Artifact of `(scope, stage)` with exactly `fingerprint`.
    pub fn load_exact(&self, stage: Stage, scope: &Scope, fingerprint: &str) -> Option<Artifact> {
        let path = self.artifact_path(scope, stage, fingerprint);
        if !path.exists() {
            return None;
        }
        match read_artifact(&path) {
            Ok(a) if a.stage == stage && a.fingerprint == fingerprint => Some(a),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable artifact");
                None
            }
        }
    }

    /// Whether `artifact` still matches `config` and the resolved `inputs`.
    pub fn is_vigent(
        &self,
        artifact: &Artifact,
        config: &StructureConfig,
        scope: &Scope,
        inputs: &ExternalInputs,
    ) -> CalcResult<bool> {
        if artifact.title != scope.title || artifact.scope != scope.prefix() {
            return Ok(false);
        }
        Ok(fingerprint(config, artifact.stage, scope, inputs)? == artifact.fingerprint)
    }

    /// Persist a stage result and its drawings, then remove every older
    /// artifact of the same stage and title.
    pub fn save<T: Serialize>(
        &self,
        stage: Stage,
        scope: &Scope,
        config: &StructureConfig,
        fingerprint: &str,
        payload: &T,
        drawings: &[Drawing],
    ) -> CalcResult<Artifact> {
        let mut images = Vec::with_capacity(2 * drawings.len());
        for d in drawings {
            for (ext, bytes) in [("png", d.png.as_slice()), ("svg", d.svg.as_bytes())] {
                write_atomic(&self.image_path(scope, stage, fingerprint, &d.suffix, ext), bytes)?;
                images.push(image_name(scope, stage, fingerprint, &d.suffix, ext));
            }
        }

        let artifact = Artifact {
            version: SCHEMA_VERSION.to_string(),
            stage,
            title: scope.title.clone(),
            scope: scope.prefix(),
            fingerprint: fingerprint.to_string(),
            created: Utc::now(),
            config_snapshot: config_subset(config, stage)?,
            payload: serde_json::to_value(payload).map_err(CalcError::serialization)?,
            images,
        };
        let path = self.artifact_path(scope, stage, fingerprint);
        write_json_atomic(&artifact, &path)?;
        debug!(stage = %stage, path = %path.display(), "artifact saved");

        self.remove_stale(scope, stage, fingerprint)?;
        Ok(artifact)
    }

    fn remove_stale(&self, scope: &Scope, stage: Stage, keep: &str) -> CalcResult<()> {
        let prefix = Self::prefix(scope, stage);
        let keep_prefix = format!("{}{}.", prefix, keep);
        let dir = self.dir_for(scope);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(());
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&prefix) && !name.starts_with(&keep_prefix) && !name.ends_with(".tmp") {
                fs::remove_file(&path)
                    .map_err(|e| CalcError::file_error("remove stale artifact", path.display().to_string(), e.to_string()))?;
                debug!(path = %path.display(), "stale artifact removed");
            }
        }
        Ok(())
    }
}

fn read_artifact(path: &Path) -> CalcResult<Artifact> {
    let artifact: Artifact = read_json(path)?;
    validate_version(&artifact.version)?;
    Ok(artifact)
}

fn image_name(scope: &Scope, stage: Stage, fingerprint: &str, suffix: &str, ext: &str) -> String {
    format!("{}{}.{}.{}", Cache::prefix(scope, stage), fingerprint, safe_name(suffix), ext)
}

/// File-system safe rendering of a title or member name.
pub fn safe_name(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use serde_json::json;
    use tempfile::TempDir;

    fn drawing(suffix: &str) -> Drawing {
        Drawing {
            suffix: suffix.to_string(),
            png: b"\x89PNG\r\n\x1a\n".to_vec(),
            svg: "<svg/>".to_string(),
        }
    }

    fn setup() -> (TempDir, Cache, StructureConfig, Scope) {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let config = sample();
        let scope = Scope::standalone(&config.titulo);
        (dir, cache, config, scope)
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, cache, config, scope) = setup();
        let fp = fingerprint(&config, Stage::Costing, &scope, &ExternalInputs::none()).unwrap();
        cache
            .save(Stage::Costing, &scope, &config, &fp, &json!({"total": 1.5}), &[])
            .unwrap();

        let loaded = cache.load(Stage::Costing, &scope).unwrap();
        assert_eq!(loaded.fingerprint, fp);
        assert_eq!(loaded.payload["total"], 1.5);
        assert!(loaded.config_snapshot.get("costeo").is_some());
        assert!(loaded.config_snapshot.get("L_vano").is_none());
        assert!(cache.is_vigent(&loaded, &config, &scope, &ExternalInputs::none()).unwrap());
        assert!(cache.load(Stage::Aee, &scope).is_none());
    }

    #[test]
    fn test_file_names() {
        let (_dir, cache, config, scope) = setup();
        let fp = fingerprint(&config, Stage::Trees, &scope, &ExternalInputs::none()).unwrap();
        let a = cache
            .save(Stage::Trees, &scope, &config, &fp, &json!({}), &[drawing("A1")])
            .unwrap();
        let json_name = format!("{}.calculoArbolesCarga.{}.json", config.titulo, fp);
        let png_name = format!("{}.calculoArbolesCarga.{}.A1.png", config.titulo, fp);
        let svg_name = format!("{}.calculoArbolesCarga.{}.A1.svg", config.titulo, fp);
        assert!(cache.root().join(&json_name).exists());
        assert!(fs::read(cache.root().join(&png_name)).unwrap().starts_with(b"\x89PNG"));
        assert!(cache.root().join(&svg_name).exists());
        assert_eq!(a.images, vec![png_name, svg_name]);
    }

    #[test]
    fn test_save_replaces_older_artifacts() {
        let (_dir, cache, config, scope) = setup();
        let old = fingerprint(&config, Stage::Costing, &scope, &ExternalInputs::none()).unwrap();
        cache
            .save(Stage::Costing, &scope, &config, &old, &json!(1), &[drawing("x")])
            .unwrap();

        let mut changed = config.clone();
        changed.costeo.precio_cruceta += 1.0;
        let new = fingerprint(&changed, Stage::Costing, &scope, &ExternalInputs::none()).unwrap();
        assert_ne!(old, new);
        let stale = cache.load(Stage::Costing, &scope).unwrap();
        assert!(!cache.is_vigent(&stale, &changed, &scope, &ExternalInputs::none()).unwrap());

        cache
            .save(Stage::Costing, &scope, &changed, &new, &json!(2), &[])
            .unwrap();
        let names: Vec<String> = fs::read_dir(cache.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{:?}", names);
        assert!(names[0].contains(&new));
    }

    #[test]
    fn test_family_scope_directory() {
        let (_dir, cache, config, _) = setup();
        let e1 = Scope::member("Linea", "E1", &config.titulo);
        let e2 = Scope::member("Linea", "E2", &config.titulo);
        let fp1 = fingerprint(&config, Stage::Cmc, &e1, &ExternalInputs::none()).unwrap();
        cache.save(Stage::Cmc, &e1, &config, &fp1, &json!(1), &[]).unwrap();

        assert!(cache.dir_for(&e1).ends_with("Linea/E1"));
        assert!(cache.load(Stage::Cmc, &e1).is_some());
        assert!(cache.load(Stage::Cmc, &e2).is_none());
        let a = cache.load(Stage::Cmc, &e1).unwrap();
        assert!(!cache.is_vigent(&a, &config, &e2, &ExternalInputs::none()).unwrap());
        assert!(cache.load_exact(Stage::Cmc, &e1, &fp1).is_some());
    }

    #[test]
    fn test_unreadable_artifact_is_absent() {
        let (_dir, cache, config, scope) = setup();
        let fp = fingerprint(&config, Stage::Dge, &scope, &ExternalInputs::none()).unwrap();
        fs::write(cache.artifact_path(&scope, Stage::Dge, &fp), "{").unwrap();
        assert!(cache.load(Stage::Dge, &scope).is_none());
        assert!(cache.load_exact(Stage::Dge, &scope, &fp).is_none());
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("S/E 132:kV"), "S_E 132_kV");
    }
}
