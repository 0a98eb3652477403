//! # Costing
//!
//! Affine cost model over the quantities produced by DGE, SPH and the
//! foundation:
//!
//! ```text
//! Cost = n_postes·(A·L + B·Rc + C)
//!      + n_crucetas·P_cruceta + n_mensulas·P_mensula + n_vinculos·P_vinculo
//!      + V_hormigon·P_m3·F_hierro
//!      + P_estructura·F_terreno
//!      + P_adicional
//! ```
//!
//! The report carries the governing member of the stress analysis so the
//! price sits next to the check it depends on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calculations::aee::AeeResult;
use crate::calculations::dge::{ConnectionKind, Geometry};
use crate::calculations::foundation::FoundationResult;
use crate::calculations::sph::SphResult;
use crate::config::{non_negative, positive};
use crate::errors::CalcResult;

/// Coefficients and unit prices (`costeo` group). Prices in UM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostParams {
    /// Pole cost per metre of length
    #[serde(rename = "A", default = "default_a")]
    pub a: f64,
    /// Pole cost per daN of class
    #[serde(rename = "B", default = "default_b")]
    pub b: f64,
    #[serde(rename = "C", default = "default_c")]
    pub c: f64,
    #[serde(default = "default_cruceta")]
    pub precio_cruceta: f64,
    #[serde(default = "default_mensula")]
    pub precio_mensula: f64,
    #[serde(default = "default_vinculo")]
    pub precio_vinculo: f64,
    #[serde(default = "default_m3")]
    pub precio_m3_hormigon: f64,
    #[serde(default = "default_hierro")]
    pub factor_hierro: f64,
    #[serde(default)]
    pub precio_estructura: f64,
    #[serde(default = "one")]
    pub factor_terreno: f64,
    #[serde(default)]
    pub precio_adicional: f64,
    /// Vertical spacing of links between grouped poles (m)
    #[serde(default = "default_separacion")]
    pub separacion_vinculos: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_vinculos: Option<u32>,
}

fn default_a() -> f64 {
    127.38
}
fn default_b() -> f64 {
    1.544
}
fn default_c() -> f64 {
    -631.85
}
fn default_cruceta() -> f64 {
    350.0
}
fn default_mensula() -> f64 {
    180.0
}
fn default_vinculo() -> f64 {
    60.0
}
fn default_m3() -> f64 {
    95.0
}
fn default_hierro() -> f64 {
    1.1
}
fn one() -> f64 {
    1.0
}
fn default_separacion() -> f64 {
    3.0
}

impl Default for CostParams {
    fn default() -> Self {
        CostParams {
            a: default_a(),
            b: default_b(),
            c: default_c(),
            precio_cruceta: default_cruceta(),
            precio_mensula: default_mensula(),
            precio_vinculo: default_vinculo(),
            precio_m3_hormigon: default_m3(),
            factor_hierro: default_hierro(),
            precio_estructura: 0.0,
            factor_terreno: 1.0,
            precio_adicional: 0.0,
            separacion_vinculos: default_separacion(),
            n_vinculos: None,
        }
    }
}

impl CostParams {
    pub fn validate(&self) -> CalcResult<()> {
        non_negative("costeo.precio_cruceta", self.precio_cruceta)?;
        non_negative("costeo.precio_mensula", self.precio_mensula)?;
        non_negative("costeo.precio_vinculo", self.precio_vinculo)?;
        non_negative("costeo.precio_m3_hormigon", self.precio_m3_hormigon)?;
        non_negative("costeo.factor_hierro", self.factor_hierro)?;
        non_negative("costeo.precio_estructura", self.precio_estructura)?;
        non_negative("costeo.factor_terreno", self.factor_terreno)?;
        positive("costeo.separacion_vinculos", self.separacion_vinculos)
    }

    /// Unit cost of one pole of length `l` and class `rc`.
    pub fn pole_cost(&self, l: f64, rc: f64) -> f64 {
        self.a * l + self.b * rc + self.c
    }
}

/// Quantities entering the cost model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostQuantities {
    pub n_postes: u8,
    pub longitud_m: f64,
    pub rc_dan: f64,
    pub n_crucetas: u32,
    pub n_mensulas: u32,
    pub n_vinculos: u32,
    pub volumen_hormigon_m3: f64,
}

/// Cost per item (UM).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub postes: f64,
    pub crucetas: f64,
    pub mensulas: f64,
    pub vinculos: f64,
    pub hormigon: f64,
    pub estructura: f64,
    pub adicional: f64,
    pub total: f64,
}

/// Costing stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResult {
    pub cantidades: CostQuantities,
    pub costos: CostBreakdown,
    pub verificacion: StructuralCheck,
}

/// Governing result of the stress analysis for the costed structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralCheck {
    pub hipotesis_critica: String,
    pub miembro_critico: String,
    /// daN·m
    pub mf_max: f64,
    /// daN·m
    pub mr_max: f64,
}

impl From<&AeeResult> for StructuralCheck {
    fn from(aee: &AeeResult) -> Self {
        StructuralCheck {
            hipotesis_critica: aee.hipotesis_critica.clone(),
            miembro_critico: aee.miembro_critico.clone(),
            mf_max: aee.mf_max,
            mr_max: aee.mr_max,
        }
    }
}

/// Crossarms and brackets by altitude (cm). A level with a crossarm counts
/// one crossarm and no brackets; otherwise every bracket counts.
pub fn count_arms(geometry: &Geometry) -> (u32, u32) {
    #[derive(Default)]
    struct Level {
        cross: bool,
        brackets: u32,
    }
    let mut levels: BTreeMap<i64, Level> = BTreeMap::new();
    for c in &geometry.connections {
        if !matches!(c.kind, ConnectionKind::Cross | ConnectionKind::Bracket) {
            continue;
        }
        let (Some(a), Some(b)) = (geometry.nodes.get(&c.a), geometry.nodes.get(&c.b)) else {
            continue;
        };
        let key = ((a.z + b.z) / 2.0 * 100.0).round() as i64;
        let level = levels.entry(key).or_default();
        match c.kind {
            ConnectionKind::Cross => level.cross = true,
            _ => level.brackets += 1,
        }
    }
    levels.values().fold((0, 0), |(cross, brackets), l| {
        if l.cross {
            (cross + 1, brackets)
        } else {
            (cross, brackets + l.brackets)
        }
    })
}

pub fn quantities(
    params: &CostParams,
    geometry: &Geometry,
    sph: &SphResult,
    foundation: &FoundationResult,
) -> CostQuantities {
    let (n_crucetas, n_mensulas) = count_arms(geometry);
    let n_vinculos = params.n_vinculos.unwrap_or_else(|| {
        let per_gap = (sph.hl_m / params.separacion_vinculos).ceil() as u32;
        per_gap * u32::from(sph.n_postes.saturating_sub(1))
    });
    CostQuantities {
        n_postes: sph.n_postes,
        longitud_m: sph.longitud_m,
        rc_dan: sph.rc_dan,
        n_crucetas,
        n_mensulas,
        n_vinculos,
        volumen_hormigon_m3: foundation.total_volume(),
    }
}

/// Price a set of quantities.
pub fn price(params: &CostParams, q: &CostQuantities) -> CostBreakdown {
    let postes = f64::from(q.n_postes) * params.pole_cost(q.longitud_m, q.rc_dan);
    let crucetas = f64::from(q.n_crucetas) * params.precio_cruceta;
    let mensulas = f64::from(q.n_mensulas) * params.precio_mensula;
    let vinculos = f64::from(q.n_vinculos) * params.precio_vinculo;
    let hormigon = q.volumen_hormigon_m3 * params.precio_m3_hormigon * params.factor_hierro;
    let estructura = params.precio_estructura * params.factor_terreno;
    let adicional = params.precio_adicional;
    CostBreakdown {
        postes,
        crucetas,
        mensulas,
        vinculos,
        hormigon,
        estructura,
        adicional,
        total: postes + crucetas + mensulas + vinculos + hormigon + estructura + adicional,
    }
}

pub fn calculate(
    params: &CostParams,
    geometry: &Geometry,
    sph: &SphResult,
    foundation: &FoundationResult,
    aee: &AeeResult,
) -> CalcResult<CostResult> {
    let cantidades = quantities(params, geometry, sph, foundation);
    let costos = price(params, &cantidades);
    let verificacion = StructuralCheck::from(aee);
    info!(
        total = costos.total,
        miembro_critico = %verificacion.miembro_critico,
        "structure costed"
    );
    Ok(CostResult {
        cantidades,
        costos,
        verificacion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::dge::tests::sample_geometry;
    use approx::assert_relative_eq;

    fn two_poles() -> CostQuantities {
        CostQuantities {
            n_postes: 2,
            longitud_m: 18.0,
            rc_dan: 800.0,
            n_crucetas: 0,
            n_mensulas: 0,
            n_vinculos: 0,
            volumen_hormigon_m3: 0.0,
        }
    }

    #[test]
    fn test_pole_affine_model() {
        let p = CostParams::default();
        let c = price(&p, &two_poles());
        assert_relative_eq!(c.postes, 5792.38, epsilon = 1e-6);
        assert_relative_eq!(c.total, 5792.38, epsilon = 1e-6);
    }

    #[test]
    fn test_totals_add_every_item() {
        let p = CostParams {
            precio_estructura: 1000.0,
            factor_terreno: 1.2,
            precio_adicional: 50.0,
            ..CostParams::default()
        };
        let q = CostQuantities {
            n_crucetas: 2,
            n_mensulas: 1,
            n_vinculos: 6,
            volumen_hormigon_m3: 4.0,
            ..two_poles()
        };
        let c = price(&p, &q);
        assert_relative_eq!(c.hormigon, 4.0 * 95.0 * 1.1, epsilon = 1e-9);
        let expected = 5792.38 + 2.0 * 350.0 + 180.0 + 6.0 * 60.0 + 418.0 + 1200.0 + 50.0;
        assert_relative_eq!(c.total, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_report_carries_governing_member() {
        let aee = AeeResult {
            hipotesis: Vec::new(),
            mf_max: 1250.0,
            mr_max: 40.0,
            hipotesis_critica: "A2".to_string(),
            miembro_critico: "BASE-C3_L".to_string(),
        };
        let check = StructuralCheck::from(&aee);
        assert_eq!(check.hipotesis_critica, "A2");
        assert_eq!(check.miembro_critico, "BASE-C3_L");
        assert_relative_eq!(check.mf_max, 1250.0);
        assert_relative_eq!(check.mr_max, 40.0);
    }

    #[test]
    fn test_vertical_simple_counts_brackets() {
        let (_, _, g) = sample_geometry();
        let (cross, brackets) = count_arms(&g);
        assert_eq!(cross, 0);
        assert!(brackets >= 3);
    }
}
