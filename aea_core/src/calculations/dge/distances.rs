//! Electrical distances: altitude correction, insulator swing and the
//! phase-phase, shield-phase and structure-phase clearances.

use serde::{Deserialize, Serialize};

use crate::calculations::cmc::CmcResult;
use crate::config::StructureConfig;
use crate::errors::CalcResult;

/// Electrical distance results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricalDistances {
    /// Altitude correction factor
    pub ka: f64,
    /// Highest system voltage (kV)
    pub vm_kv: f64,
    pub theta_max_deg: f64,
    /// Sag coefficient
    pub k: f64,
    pub d_fases: f64,
    pub dhg: f64,
    pub s_estructura: f64,
    /// Swinging string length: `Lk` for suspension, 0 for tension strings
    pub lk_susp: f64,
    pub f_max: f64,
}

/// Altitude correction above 1000 m.
pub fn altitude_factor(msnm: f64) -> f64 {
    if msnm > 1000.0 {
        1.0 + 0.0125 * (msnm - 1000.0) / 100.0
    } else {
        1.0
    }
}

/// Highest system voltage for a nominal voltage.
pub fn highest_voltage(un_kv: f64) -> f64 {
    const TABLE: [(f64, f64); 7] = [
        (13.2, 14.5),
        (33.0, 36.0),
        (66.0, 72.5),
        (132.0, 145.0),
        (220.0, 245.0),
        (330.0, 362.0),
        (500.0, 550.0),
    ];
    TABLE
        .iter()
        .find(|(un, _)| (un - un_kv).abs() < 1e-6)
        .map(|(_, vm)| *vm)
        .unwrap_or(1.1 * un_kv)
}

/// Coefficient applied to the square root of sag.
pub fn sag_coefficient(theta_deg: f64) -> f64 {
    if theta_deg >= 65.0 {
        0.70
    } else if theta_deg >= 40.0 {
        0.65
    } else {
        0.60
    }
}

pub fn calculate(config: &StructureConfig, cmc: &CmcResult) -> CalcResult<ElectricalDistances> {
    let ka = altitude_factor(config.geometria.altura_msnm);
    let vm = highest_voltage(config.tension_kv);
    let suspension = config.tipo_estructura.is_suspension();

    let theta_max_deg = if suspension {
        let vmax = config.estados_climaticos.find_max_wind()?;
        let w = cmc.conductor.row(&vmax.id)?.w_used;
        let fv = w.horizontal * config.l_vano;
        let p = w.vertical * config.l_vano;
        fv.atan2(p + config.geometria.pcadena / 2.0).to_degrees()
    } else {
        0.0
    };
    let k = sag_coefficient(theta_max_deg);
    let lk_susp = if suspension { config.lk } else { 0.0 };
    let f_max = cmc.conductor.f_total_max();

    Ok(ElectricalDistances {
        ka,
        vm_kv: vm,
        theta_max_deg,
        k,
        d_fases: k * (f_max + lk_susp).sqrt() + vm / 150.0 * ka,
        dhg: k * f_max.sqrt() + vm / (150.0 * 3f64.sqrt()) * ka,
        s_estructura: ka * (0.1 + vm / 150.0),
        lk_susp,
        f_max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::cmc;
    use crate::catalog::default_catalog;
    use crate::config::tests::sample;
    use crate::config::StructureType;
    use approx::assert_relative_eq;

    #[test]
    fn test_altitude_factor() {
        assert_eq!(altitude_factor(0.0), 1.0);
        assert_eq!(altitude_factor(1000.0), 1.0);
        assert_relative_eq!(altitude_factor(2000.0), 1.125);
    }

    #[test]
    fn test_highest_voltage() {
        assert_eq!(highest_voltage(132.0), 145.0);
        assert_eq!(highest_voltage(500.0), 550.0);
        assert_relative_eq!(highest_voltage(100.0), 110.0);
    }

    #[test]
    fn test_sag_coefficient_steps() {
        assert_eq!(sag_coefficient(30.0), 0.60);
        assert_eq!(sag_coefficient(40.0), 0.65);
        assert_eq!(sag_coefficient(70.0), 0.70);
    }

    #[test]
    fn test_suspension_distances() {
        let config = sample();
        let cmc = cmc::calculate(&config, default_catalog()).unwrap();
        let d = calculate(&config, &cmc).unwrap();
        assert!(d.theta_max_deg > 40.0 && d.theta_max_deg < 65.0);
        assert_eq!(d.k, 0.65);
        assert_eq!(d.lk_susp, 1.8);
        assert_relative_eq!(d.s_estructura, 0.1 + 145.0 / 150.0, epsilon = 1e-12);
        assert_relative_eq!(d.d_fases, 0.65 * (d.f_max + 1.8).sqrt() + 145.0 / 150.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tension_string_does_not_swing() {
        let mut config = sample();
        config.tipo_estructura = StructureType::Retencion;
        let cmc = cmc::calculate(&config, default_catalog()).unwrap();
        let d = calculate(&config, &cmc).unwrap();
        assert_eq!(d.theta_max_deg, 0.0);
        assert_eq!(d.lk_susp, 0.0);
        assert_eq!(d.k, 0.60);
    }
}
