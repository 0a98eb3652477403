//! # Commercial Concrete Poles
//!
//! Catalog of commercial lengths and strength classes (`Rc`, rated at
//! 0.25 m below the top). Diameters and weights follow from the class and
//! length through the manufacturer's taper rule.

use serde::{Deserialize, Serialize};

use super::load_embedded;
use crate::errors::{CalcError, CalcResult};

/// Pole catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoleCatalog {
    pub longitudes_m: Vec<f64>,
    pub resistencias_dan: Vec<f64>,
    /// Top diameter of the lightest class (m)
    pub d_cima_base_m: f64,
    /// Top diameter growth per daN of class (m/daN)
    pub d_cima_por_dan: f64,
    /// Diameter growth per metre of length (m/m)
    pub conicidad: f64,
    pub densidad_hormigon_dan_m3: f64,
    /// Solid share of the hollow section
    pub fraccion_maciza: f64,
}

impl PoleCatalog {
    pub fn embedded() -> CalcResult<Self> {
        let mut catalog: PoleCatalog = load_embedded("postes.json")?;
        catalog.sort();
        Ok(catalog)
    }

    fn sort(&mut self) {
        self.longitudes_m.sort_by(f64::total_cmp);
        self.resistencias_dan.sort_by(f64::total_cmp);
    }

    pub fn validate(&self) -> CalcResult<()> {
        if self.longitudes_m.is_empty() || self.resistencias_dan.is_empty() {
            return Err(CalcError::invalid_input(
                "postes",
                "[]",
                "Pole catalog needs at least one length and one class",
            ));
        }
        if self.longitudes_m.iter().chain(&self.resistencias_dan).any(|v| *v <= 0.0) {
            return Err(CalcError::invalid_input(
                "postes",
                "<= 0",
                "Lengths and classes must be positive",
            ));
        }
        Ok(())
    }

    pub fn d_cima(&self, rc_dan: f64) -> f64 {
        self.d_cima_base_m + self.d_cima_por_dan * rc_dan
    }

    pub fn d_base(&self, length_m: f64, rc_dan: f64) -> f64 {
        self.d_cima(rc_dan) + self.conicidad * length_m
    }

    /// Pole self-weight (daN) from the truncated-cone volume.
    pub fn weight_dan(&self, length_m: f64, rc_dan: f64) -> f64 {
        let r1 = self.d_cima(rc_dan) / 2.0;
        let r2 = self.d_base(length_m, rc_dan) / 2.0;
        let volume = std::f64::consts::PI * length_m / 3.0 * (r1 * r1 + r1 * r2 + r2 * r2);
        volume * self.fraccion_maciza * self.densidad_hormigon_dan_m3
    }
}
