//! # Cable Catalog
//!
//! Immutable reference data for conductors and guard wires, keyed by name.
//! The default catalog is embedded into the library and parsed once per
//! process; structures may shadow entries with `cables_personalizados`.
//!
//! ## Example
//!
//! ```rust
//! use aea_core::catalog::cables::default_catalog;
//!
//! let cable = default_catalog().get("Al/Ac 300/50").unwrap();
//! assert!(cable.ea_dan() > 0.0);
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::load_embedded;
use crate::errors::{CalcError, CalcResult};
use crate::units::{Meters, Millimeters};

/// Steel core properties of a composite cable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableCore {
    pub seccion_acero_mm2: f64,
    pub modulo_acero_dan_mm2: f64,
    pub coef_dilatacion_acero: f64,
}

/// Catalog entry for a cable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cable {
    #[serde(default)]
    pub nombre: String,
    pub material: String,
    pub seccion_mm2: f64,
    pub diametro_mm: f64,
    /// Bare unit weight (daN/m)
    pub peso_dan_m: f64,
    pub modulo_elasticidad_dan_mm2: f64,
    /// Linear thermal expansion (1/°C)
    pub coef_dilatacion: f64,
    /// Ultimate tensile strength (daN)
    pub carga_rotura_dan: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nucleo: Option<CableCore>,
}

impl Cable {
    /// Axial stiffness E·A in daN
    pub fn ea_dan(&self) -> f64 {
        self.modulo_elasticidad_dan_mm2 * self.seccion_mm2
    }

    pub fn diameter_m(&self) -> f64 {
        Meters::from(Millimeters(self.diametro_mm)).value()
    }

    /// Steel share of the cross section, 0 for homogeneous cables
    pub fn steel_ratio(&self) -> f64 {
        match &self.nucleo {
            Some(core) if self.seccion_mm2 > 0.0 => core.seccion_acero_mm2 / self.seccion_mm2,
            _ => 0.0,
        }
    }

    pub fn validate(&self) -> CalcResult<()> {
        let checks = [
            ("seccion_mm2", self.seccion_mm2),
            ("diametro_mm", self.diametro_mm),
            ("peso_dan_m", self.peso_dan_m),
            ("modulo_elasticidad_dan_mm2", self.modulo_elasticidad_dan_mm2),
            ("coef_dilatacion", self.coef_dilatacion),
            ("carga_rotura_dan", self.carga_rotura_dan),
        ];
        for (field, value) in checks {
            if !(value > 0.0) || !value.is_finite() {
                return Err(CalcError::invalid_input(
                    format!("cable '{}'.{}", self.nombre, field),
                    value.to_string(),
                    "Cable properties must be positive",
                ));
            }
        }
        Ok(())
    }
}

/// Name-keyed cable catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CableCatalog {
    cables: BTreeMap<String, Cable>,
}

impl CableCatalog {
    /// Build from a map, filling each record's `nombre` from its key.
    pub fn from_map(map: BTreeMap<String, Cable>) -> Self {
        let cables = map
            .into_iter()
            .map(|(name, mut cable)| {
                cable.nombre = name.clone();
                (name, cable)
            })
            .collect();
        CableCatalog { cables }
    }

    /// Parse the catalog shipped with the library.
    pub fn embedded() -> CalcResult<Self> {
        let map: BTreeMap<String, Cable> = load_embedded("cables.json")?;
        Ok(Self::from_map(map))
    }

    /// Load a catalog document from disk.
    pub fn from_path(path: &Path) -> CalcResult<Self> {
        let map: BTreeMap<String, Cable> = crate::file_io::read_json(path)?;
        Ok(Self::from_map(map))
    }

    pub fn get(&self, name: &str) -> CalcResult<&Cable> {
        self.cables
            .get(name)
            .ok_or_else(|| CalcError::missing_reference("cable", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cables.is_empty()
    }

    /// Copy of this catalog with `overrides` shadowing same-named entries.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, Cable>) -> Self {
        let mut merged = self.cables.clone();
        for (name, cable) in overrides {
            let mut cable = cable.clone();
            cable.nombre = name.clone();
            merged.insert(name.clone(), cable);
        }
        CableCatalog { cables: merged }
    }
}

static DEFAULT_CATALOG: Lazy<CableCatalog> = Lazy::new(|| match CableCatalog::embedded() {
    Ok(catalog) => catalog,
    Err(err) => {
        tracing::error!(%err, "embedded cable catalog is unreadable");
        CableCatalog::default()
    }
});

/// Process-wide default cable catalog.
pub fn default_catalog() -> &'static CableCatalog {
    &DEFAULT_CATALOG
}
