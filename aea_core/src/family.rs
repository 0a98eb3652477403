//! # Structure Families
//!
//! A family is an ordered set of structure documents sharing an overlay of
//! climatic and policy keys. Families save as `{nombre}.familia.json`:
//!
//! ```text
//! Family
//! ├── meta: FamilyMetadata (version, nombre, proyectista, timestamps)
//! ├── superposicion: shared keys merged onto every member
//! └── miembros: [FamilyMember { nombre, estructura }]
//! ```
//!
//! Members are kept as raw JSON so the overlay is merged before the
//! document is parsed. Each member runs the full pipeline in its own cache
//! scope `{cache}/{familia}/{miembro}/`.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cache::safe_name;
use crate::calculations::costing::CostBreakdown;
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};
use crate::file_io::{read_json, validate_version, write_json_atomic, FileLock, LockInfo, SCHEMA_VERSION};
use crate::fingerprint::Scope;
use crate::pipeline::{Pipeline, RunLog};

/// Extension of family documents
pub const FAMILY_EXTENSION: &str = "familia.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMetadata {
    pub version: String,
    pub nombre: String,
    pub proyectista: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMember {
    pub nombre: String,
    /// Structure document before the overlay
    pub estructura: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub meta: FamilyMetadata,
    #[serde(default)]
    pub superposicion: Map<String, Value>,
    #[serde(default)]
    pub miembros: Vec<FamilyMember>,
}

impl Family {
    pub fn new(nombre: impl Into<String>, proyectista: impl Into<String>) -> Self {
        let now = Utc::now();
        Family {
            meta: FamilyMetadata {
                version: SCHEMA_VERSION.to_string(),
                nombre: nombre.into(),
                proyectista: proyectista.into(),
                created: now,
                modified: now,
            },
            superposicion: Map::new(),
            miembros: Vec::new(),
        }
    }

    /// Append a member; names are unique within a family.
    pub fn add_member(&mut self, nombre: impl Into<String>, estructura: Value) -> CalcResult<()> {
        let nombre = nombre.into();
        if self.member(&nombre).is_some() {
            return Err(CalcError::invalid_input(
                "miembros",
                nombre,
                "a member with this name already exists",
            ));
        }
        if !estructura.is_object() {
            return Err(CalcError::invalid_input(
                "estructura",
                nombre,
                "member document must be a JSON object",
            ));
        }
        self.miembros.push(FamilyMember { nombre, estructura });
        self.touch();
        Ok(())
    }

    pub fn remove_member(&mut self, nombre: &str) -> Option<FamilyMember> {
        let i = self.miembros.iter().position(|m| m.nombre == nombre)?;
        self.touch();
        Some(self.miembros.remove(i))
    }

    pub fn member(&self, nombre: &str) -> Option<&FamilyMember> {
        self.miembros.iter().find(|m| m.nombre == nombre)
    }

    /// Set one overlay key.
    pub fn set_overlay(&mut self, key: impl Into<String>, value: Value) {
        self.superposicion.insert(key.into(), value);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.meta.modified = Utc::now();
    }

    /// Member document with the overlay merged on top.
    pub fn merged_document(&self, nombre: &str) -> CalcResult<Value> {
        let member = self
            .member(nombre)
            .ok_or_else(|| CalcError::missing_reference("family member", nombre))?;
        let mut doc = member.estructura.clone();
        merge(&mut doc, &Value::Object(self.superposicion.clone()));
        Ok(doc)
    }

    /// Parsed and validated member configuration.
    pub fn member_config(&self, nombre: &str) -> CalcResult<StructureConfig> {
        let config = StructureConfig::from_value(self.merged_document(nombre)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Cache scope of a member.
    pub fn scope(&self, nombre: &str, config: &StructureConfig) -> Scope {
        Scope::member(&self.meta.nombre, nombre, &config.titulo)
    }

    /// `{dir}/{nombre}.familia.json`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", safe_name(&self.meta.nombre), FAMILY_EXTENSION))
    }
}

/// Merge `overlay` into `doc`: objects merge key by key, anything else
/// in the overlay replaces the member's value.
pub fn merge(doc: &mut Value, overlay: &Value) {
    match (doc, overlay) {
        (Value::Object(target), Value::Object(source)) => {
            for (k, v) in source {
                match target.get_mut(k) {
                    Some(existing) if existing.is_object() && v.is_object() => merge(existing, v),
                    _ => {
                        target.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Save atomically while holding the document lock.
pub fn save_family(family: &Family, path: &Path, user: &str) -> CalcResult<()> {
    let _lock = FileLock::acquire(path, user)?;
    write_json_atomic(family, path)
}

pub fn load_family(path: &Path) -> CalcResult<Family> {
    let family: Family = read_json(path)?;
    validate_version(&family.meta.version)?;
    Ok(family)
}

/// Load, also reporting who holds the document lock.
pub fn load_family_with_lock_check(path: &Path) -> CalcResult<(Family, Option<LockInfo>)> {
    let family = load_family(path)?;
    Ok((family, FileLock::check(path)))
}

// ============================================================================
// Runner
// ============================================================================

/// Outcome of one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberReport {
    pub miembro: String,
    pub titulo: Option<String>,
    /// Absent when the member document itself was rejected
    pub log: Option<RunLog>,
    pub error: Option<CalcError>,
    pub costo: Option<CostBreakdown>,
    /// Artifact files of this member, relative to the cache root
    pub artefactos: Vec<String>,
}

impl MemberReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.log.as_ref().is_some_and(RunLog::is_success)
    }
}

/// Family artifact: member outcomes and aggregated cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyReport {
    pub version: String,
    pub familia: String,
    pub created: DateTime<Utc>,
    pub miembros: Vec<MemberReport>,
    /// Sum of member totals that were costed (UM)
    pub costo_total: f64,
    pub completo: bool,
}

impl FamilyReport {
    pub fn member(&self, nombre: &str) -> Option<&MemberReport> {
        self.miembros.iter().find(|m| m.miembro == nombre)
    }
}

/// Runs every member sequentially through one pipeline.
pub struct FamilyRunner {
    pipeline: Pipeline,
}

impl FamilyRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        FamilyRunner { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// `{cache}/{familia}/{familia}.calculoFamilia.json`
    pub fn report_path(&self, family: &Family) -> PathBuf {
        let name = safe_name(&family.meta.nombre);
        self.pipeline
            .cache()
            .root()
            .join(&name)
            .join(format!("{}.calculoFamilia.json", name))
    }

    /// Run every member, then persist and return the family report.
    pub fn run(&self, family: &Family) -> CalcResult<FamilyReport> {
        info!(familia = %family.meta.nombre, miembros = family.miembros.len(), "family run started");
        let miembros: Vec<MemberReport> = family
            .miembros
            .iter()
            .map(|m| self.run_member(family, &m.nombre))
            .collect();

        let costo_total: f64 = miembros.iter().filter_map(|m| m.costo.as_ref()).map(|c| c.total).sum();
        let report = FamilyReport {
            version: SCHEMA_VERSION.to_string(),
            familia: family.meta.nombre.clone(),
            created: Utc::now(),
            completo: miembros.iter().all(MemberReport::succeeded),
            miembros,
            costo_total,
        };
        write_json_atomic(&report, &self.report_path(family))?;
        info!(familia = %report.familia, costo_total = report.costo_total, completo = report.completo, "family run finished");
        Ok(report)
    }

    fn run_member(&self, family: &Family, nombre: &str) -> MemberReport {
        let mut report = MemberReport {
            miembro: nombre.to_string(),
            titulo: None,
            log: None,
            error: None,
            costo: None,
            artefactos: Vec::new(),
        };
        let config = match family.member_config(nombre) {
            Ok(c) => c,
            Err(e) => {
                warn!(miembro = nombre, error = %e, "member rejected");
                report.error = Some(e);
                return report;
            }
        };
        report.titulo = Some(config.titulo.clone());
        let scope = family.scope(nombre, &config);

        match self.pipeline.run(&config, &scope, &[]) {
            Ok(run) => {
                let cache = self.pipeline.cache();
                report.artefactos = run
                    .log
                    .entries
                    .iter()
                    .filter(|e| e.outcome.succeeded())
                    .filter_map(|e| {
                        let fp = e.fingerprint.as_deref()?;
                        let path = cache.artifact_path(&scope, e.stage, fp);
                        path.strip_prefix(cache.root())
                            .ok()
                            .map(|p| p.to_string_lossy().into_owned())
                    })
                    .collect();
                report.costo = run.outputs.costing.map(|c| c.costos);
                report.log = Some(run.log);
            }
            Err(e) => {
                warn!(miembro = nombre, error = %e, "member run aborted");
                report.error = Some(e);
            }
        }
        report
    }

    /// Run on a background thread.
    pub fn spawn(self, family: Family) -> JoinHandle<CalcResult<FamilyReport>> {
        thread::spawn(move || self.run(&family))
    }
}
