//! # Unit Types
//!
//! Type-safe wrappers for the units that cross module boundaries. They stay
//! plain f64 newtypes so JSON documents remain bare numbers.
//!
//! ## Conventions
//!
//! - Length: metres (m); cable diameters arrive in millimetres (mm)
//! - Force: decanewton (daN), 1 daN = 10 N
//! - Wind velocity: km/h in documents, m/s in pressure formulas
//! - Angles: degrees in documents, radians in trigonometry
//! - Pressure: daN/m²
//!
//! ## Example
//!
//! ```rust
//! use aea_core::units::{KmH, MetersPerSecond, Degrees, Radians};
//!
//! let v: MetersPerSecond = KmH(36.0).into();
//! assert!((v.0 - 10.0).abs() < 1e-12);
//!
//! let a: Radians = Degrees(180.0).into();
//! assert!((a.0 - std::f64::consts::PI).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

// ============================================================================
// Length Units
// ============================================================================

/// Length in metres
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meters(pub f64);

/// Length in millimetres
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Millimeters(pub f64);

impl From<Millimeters> for Meters {
    fn from(mm: Millimeters) -> Self {
        Meters(mm.0 / 1000.0)
    }
}

impl From<Meters> for Millimeters {
    fn from(m: Meters) -> Self {
        Millimeters(m.0 * 1000.0)
    }
}

// ============================================================================
// Force Units
// ============================================================================

/// Force in decanewton
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaN(pub f64);

/// Force in kilogram-force
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kgf(pub f64);

/// Standard gravity used for daN/kgf conversion
pub const G_STANDARD: f64 = 9.80665;

impl From<Kgf> for DaN {
    fn from(kgf: Kgf) -> Self {
        DaN(kgf.0 * G_STANDARD / 10.0)
    }
}

impl From<DaN> for Kgf {
    fn from(dan: DaN) -> Self {
        Kgf(dan.0 * 10.0 / G_STANDARD)
    }
}

// ============================================================================
// Velocity Units
// ============================================================================

/// Wind velocity in km/h
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KmH(pub f64);

/// Wind velocity in m/s
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetersPerSecond(pub f64);

impl From<KmH> for MetersPerSecond {
    fn from(v: KmH) -> Self {
        MetersPerSecond(v.0 / 3.6)
    }
}

impl From<MetersPerSecond> for KmH {
    fn from(v: MetersPerSecond) -> Self {
        KmH(v.0 * 3.6)
    }
}

// ============================================================================
// Angle Units
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Degrees(pub f64);

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Radians(pub f64);

impl From<Degrees> for Radians {
    fn from(d: Degrees) -> Self {
        Radians(d.0.to_radians())
    }
}

impl From<Radians> for Degrees {
    fn from(r: Radians) -> Self {
        Degrees(r.0.to_degrees())
    }
}

// ============================================================================
// Arithmetic Implementations (macro to reduce boilerplate)
// ============================================================================

macro_rules! impl_arithmetic {
    ($type:ty) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl $type {
            /// Get the raw f64 value
            pub fn value(self) -> f64 {
                self.0
            }
        }
    };
}

impl_arithmetic!(Meters);
impl_arithmetic!(Millimeters);
impl_arithmetic!(DaN);
impl_arithmetic!(Kgf);
impl_arithmetic!(KmH);
impl_arithmetic!(MetersPerSecond);
impl_arithmetic!(Degrees);
impl_arithmetic!(Radians);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mm_to_m() {
        let d: Meters = Millimeters(28.1).into();
        assert!((d.0 - 0.0281).abs() < 1e-12);
    }

    #[test]
    fn test_wind_conversion() {
        let v: MetersPerSecond = KmH(140.0).into();
        assert!((v.0 - 38.888_888_9).abs() < 1e-6);
        let back: KmH = v.into();
        assert!((back.0 - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_kgf_dan() {
        let f: DaN = Kgf(1000.0).into();
        assert!((f.0 - 980.665).abs() < 1e-9);
    }

    #[test]
    fn test_arithmetic() {
        let a = Meters(10.0);
        let b = Meters(5.0);
        assert_eq!((a + b).0, 15.0);
        assert_eq!((a - b).0, 5.0);
        assert_eq!((a * 2.0).0, 20.0);
        assert_eq!((a / 2.0).value(), 5.0);
    }

    #[test]
    fn test_serialization() {
        let v = KmH(120.0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "120.0");
        let roundtrip: KmH = serde_json::from_str(&json).unwrap();
        assert_eq!(v, roundtrip);
    }
}
