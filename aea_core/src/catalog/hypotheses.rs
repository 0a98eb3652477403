//! # Load Hypothesis Catalog
//!
//! Typology-indexed loading cases (`A0..A5`, `B1..B2`, `C1..C2`). The
//! catalog is data: every hypothesis carries the same fields and DME reads
//! them without hypothesis-specific branches.
//!
//! Three sources, in priority order:
//!
//! 1. `hipotesis_personalizadas` inline in the structure document
//! 2. `{HIPOTESIS_ACTIVA}.hipotesis.json` in the caller's hypothesis folder
//! 3. the plantilla embedded in the library
//!
//! ## JSON Format
//!
//! ```json
//! {
//!   "Retención": {
//!     "C1": {
//!       "descripcion": "Rotura de conductor",
//!       "tiro": { "estado": "máximo", "patron": "dos-unilaterales" },
//!       "peso": { "factor": 1.0, "hielo": false }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::load_embedded;
use crate::config::climate::StateSelector;
use crate::config::StructureType;
use crate::errors::{CalcError, CalcResult};

// ============================================================================
// Hypothesis Records
// ============================================================================

/// Wind direction relative to the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindDirection {
    Transversal,
    Longitudinal,
    Oblicua,
}

impl WindDirection {
    pub const ALL: [WindDirection; 3] = [
        WindDirection::Transversal,
        WindDirection::Longitudinal,
        WindDirection::Oblicua,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            WindDirection::Transversal => "t",
            WindDirection::Longitudinal => "l",
            WindDirection::Oblicua => "o",
        }
    }
}

/// Which wind state a hypothesis loads with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindLevel {
    #[serde(rename = "Vmax")]
    Max,
    #[serde(rename = "Vmed")]
    Mean,
}

impl WindLevel {
    pub const ALL: [WindLevel; 2] = [WindLevel::Max, WindLevel::Mean];

    pub fn code(&self) -> &'static str {
        match self {
            WindLevel::Max => "max",
            WindLevel::Mean => "med",
        }
    }

    pub fn selector(&self) -> StateSelector {
        match self {
            WindLevel::Max => StateSelector::MaxWind,
            WindLevel::Mean => StateSelector::MeanWind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSpec {
    pub estado: WindLevel,
    pub direccion: WindDirection,
    #[serde(default = "one")]
    pub factor: f64,
}

/// How cable tensions are applied at the attachment nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensionPattern {
    #[serde(rename = "bilateral")]
    Bilateral,
    #[serde(rename = "unilateral")]
    Unilateral,
    #[serde(rename = "dos-unilaterales")]
    DosUnilaterales,
    #[serde(rename = "doble-terna-a-simple")]
    DobleTernaASimple,
}

impl TensionPattern {
    pub fn display_name(&self) -> &'static str {
        match self {
            TensionPattern::Bilateral => "bilateral",
            TensionPattern::Unilateral => "unilateral",
            TensionPattern::DosUnilaterales => "dos-unilaterales",
            TensionPattern::DobleTernaASimple => "doble-terna-a-simple",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionSpec {
    pub estado: StateSelector,
    pub patron: TensionPattern,
    #[serde(default)]
    pub reduccion_cond: f64,
    #[serde(default)]
    pub reduccion_guardia: f64,
    #[serde(default = "one")]
    pub factor_cond: f64,
    #[serde(default = "one")]
    pub factor_guardia: f64,
    /// Explicit distinguished nodes for `dos-unilaterales`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodos_distinguidos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    #[serde(default = "one")]
    pub factor: f64,
    /// Use the ice-jacketed weight of the maximum-ice state
    #[serde(default)]
    pub hielo: bool,
}

impl Default for WeightSpec {
    fn default() -> Self {
        WeightSpec { factor: 1.0, hielo: false }
    }
}

fn one() -> f64 {
    1.0
}

/// A named loading case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadHypothesis {
    pub descripcion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viento: Option<WindSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiro: Option<TensionSpec>,
    #[serde(default)]
    pub peso: WeightSpec,
    /// Point vertical overload on the top conductor (daN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sobrecarga: Option<f64>,
}

impl LoadHypothesis {
    /// `HIP_<Typology>_<code>_<short description>`
    pub fn display_name(&self, typology: StructureType, code: &str) -> String {
        let short: Vec<&str> = self.descripcion.split_whitespace().take(4).collect();
        format!(
            "HIP_{}_{}_{}",
            typology.display_name().replace(' ', "_"),
            code,
            short.join("_")
        )
    }

    pub fn validate(&self, code: &str) -> CalcResult<()> {
        if self.peso.factor < 0.0 {
            return Err(CalcError::invalid_input(
                format!("{}.peso.factor", code),
                self.peso.factor.to_string(),
                "Weight factor cannot be negative",
            ));
        }
        if let Some(t) = &self.tiro {
            for (field, v) in [("reduccion_cond", t.reduccion_cond), ("reduccion_guardia", t.reduccion_guardia)] {
                if !(0.0..=1.0).contains(&v) {
                    return Err(CalcError::invalid_input(
                        format!("{}.tiro.{}", code, field),
                        v.to_string(),
                        "Reduction must be between 0 and 1",
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Hypotheses of one typology, keyed by code.
pub type HypothesisSet = BTreeMap<String, LoadHypothesis>;

/// Typology -> code -> hypothesis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisCatalog {
    pub typologies: BTreeMap<StructureType, HypothesisSet>,
}

impl HypothesisCatalog {
    /// The plantilla shipped with the library.
    pub fn embedded() -> CalcResult<Self> {
        load_embedded("hipotesis.json")
    }

    pub fn from_path(path: &Path) -> CalcResult<Self> {
        crate::file_io::read_json(path)
    }

    /// Catalog named by `HIPOTESIS_ACTIVA` inside `dir`.
    pub fn from_active(dir: &Path, name: &str) -> CalcResult<Self> {
        let path = dir.join(format!("{}.hipotesis.json", name));
        if !path.exists() {
            return Err(CalcError::missing_reference("hypothesis catalog", name));
        }
        Self::from_path(&path)
    }

    pub fn for_typology(&self, typology: StructureType) -> CalcResult<&HypothesisSet> {
        self.typologies
            .get(&typology)
            .ok_or_else(|| CalcError::missing_reference("hypothesis typology", typology.display_name()))
    }

    pub fn validate(&self) -> CalcResult<()> {
        for set in self.typologies.values() {
            for (code, h) in set {
                h.validate(code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_plantilla() {
        let cat = HypothesisCatalog::embedded().unwrap();
        cat.validate().unwrap();
        for t in StructureType::ALL {
            let set = cat.for_typology(t).unwrap();
            assert!(set.contains_key("A0"));
            assert!(set.contains_key("B1"));
            assert!(set.contains_key("C1"));
            assert_eq!(set["B1"].peso.factor, 2.5);
        }
        let susp = cat.for_typology(StructureType::SuspensionRecta).unwrap();
        assert_eq!(susp["A5"].tiro.as_ref().unwrap().reduccion_cond, 0.5);
        assert_eq!(
            susp["A1"].viento.as_ref().unwrap().direccion,
            WindDirection::Transversal
        );
    }

    #[test]
    fn test_display_name() {
        let cat = HypothesisCatalog::embedded().unwrap();
        let h = &cat.for_typology(StructureType::Retencion).unwrap()["C1"];
        assert_eq!(
            h.display_name(StructureType::Retencion, "C1"),
            "HIP_Retención_C1_Rotura_de_conductor"
        );
    }

    #[test]
    fn test_defaults_when_fields_omitted() {
        let json = r#"{"Terminal": {"X1": {"descripcion": "solo peso"}}}"#;
        let cat: HypothesisCatalog = serde_json::from_str(json).unwrap();
        let h = &cat.for_typology(StructureType::Terminal).unwrap()["X1"];
        assert!(h.viento.is_none());
        assert!(h.tiro.is_none());
        assert_eq!(h.peso.factor, 1.0);
        assert!(cat.for_typology(StructureType::Retencion).is_err());
    }

    #[test]
    fn test_unaccented_typology_keys() {
        let json = r#"{"Retencion": {"A0": {"descripcion": "x"}}}"#;
        let cat: HypothesisCatalog = serde_json::from_str(json).unwrap();
        assert!(cat.for_typology(StructureType::Retencion).is_ok());
    }

    #[test]
    fn test_invalid_reduction() {
        let json = r#"{"descripcion": "x", "tiro": {"estado": "TMA", "patron": "bilateral", "reduccion_cond": 1.5}}"#;
        let h: LoadHypothesis = serde_json::from_str(json).unwrap();
        assert!(h.validate("A5").is_err());
    }
}
