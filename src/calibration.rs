//! Calibration engine: maps raw sensor units to tank volume.
//!
//! A [`CalibrationCurve`] is a table of `(raw, volume)` anchors measured for
//! one tank/sensor model. [`CalibrationModel::fit`] turns it into a degree-2
//! polynomial by least squares, once per run. The polynomial evaluates
//! anywhere, but outside the anchors' raw range nothing guarantees it stays
//! monotonic or physically plausible.
//!
//! [`CalibrationRegistry`] holds the known curves, keyed by tank model, plus a
//! vehicle → tank model map. It is loaded from JSON:
//!
//! ```json
//! {
//!   "tanks":    { "LM-2501": [ { "raw": 1, "volume": 0 }, { "raw": 49, "volume": 5 } ] },
//!   "vehicles": { "LL-2501": "LM-2501" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FitError, RegistryError};

// ---

pub const POLY_DEGREE: usize = 2;
const MIN_ANCHORS: usize = POLY_DEGREE + 1;

/// One measured calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationAnchor {
    pub raw: f64,
    pub volume: f64,
}

/// Calibration anchors ordered by raw unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationCurve {
    anchors: Vec<CalibrationAnchor>,
}

impl CalibrationCurve {
    // ---
    /// Build a curve. Raw units must be finite and never decrease; repeated
    /// raw values (saturated sensor ends) are accepted.
    pub fn new(anchors: Vec<CalibrationAnchor>) -> Result<Self, FitError> {
        // ---
        for (index, a) in anchors.iter().enumerate() {
            if !(a.raw.is_finite() && a.volume.is_finite()) {
                return Err(FitError::NonFiniteAnchor { index });
            }
        }
        if let Some(index) = anchors
            .windows(2)
            .position(|w| w[1].raw < w[0].raw)
        {
            return Err(FitError::NotMonotonic { index: index + 1 });
        }
        Ok(Self { anchors })
    }

    /// Build a curve from `(raw, volume)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, FitError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(raw, volume)| CalibrationAnchor { raw, volume })
                .collect(),
        )
    }

    pub fn anchors(&self) -> &[CalibrationAnchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Fitted `volume = c0 + c1 * raw + c2 * raw^2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationModel {
    /// Ascending powers: `[c0, c1, c2]`.
    coefficients: [f64; MIN_ANCHORS],
    /// Largest absolute error over the anchors used for the fit.
    max_residual: f64,
    /// Raw-unit range covered by the anchors.
    raw_range: (f64, f64),
}

impl CalibrationModel {
    // ---
    /// Least-squares degree-2 fit of volume against raw units.
    pub fn fit(curve: &CalibrationCurve) -> Result<Self, FitError> {
        // ---
        let anchors = curve.anchors();
        if anchors.len() < MIN_ANCHORS {
            return Err(FitError::TooFewAnchors {
                required: MIN_ANCHORS,
                actual: anchors.len(),
            });
        }

        let mut distinct: Vec<f64> = anchors.iter().map(|a| a.raw).collect();
        distinct.dedup();
        if distinct.len() < MIN_ANCHORS {
            return Err(FitError::DegenerateAnchors {
                distinct: distinct.len(),
            });
        }

        // Fit in t = (raw - center) / scale, |t| <= 1, to keep the normal
        // equations well conditioned, then map back to raw units.
        let lo = anchors.first().map_or(0.0, |a| a.raw);
        let hi = anchors.last().map_or(0.0, |a| a.raw);
        let center = 0.5 * (lo + hi);
        let scale = 0.5 * (hi - lo);

        let mut gram = [[0.0; MIN_ANCHORS]; MIN_ANCHORS];
        let mut rhs = [0.0; MIN_ANCHORS];
        for a in anchors {
            let t = (a.raw - center) / scale;
            let basis = [1.0, t, t * t];
            for i in 0..MIN_ANCHORS {
                rhs[i] += basis[i] * a.volume;
                for j in 0..MIN_ANCHORS {
                    gram[i][j] += basis[i] * basis[j];
                }
            }
        }

        let [a0, a1, a2] = solve3(gram, rhs).ok_or(FitError::DegenerateAnchors {
            distinct: distinct.len(),
        })?;

        let coefficients = [
            a0 - a1 * center / scale + a2 * center * center / (scale * scale),
            a1 / scale - 2.0 * a2 * center / (scale * scale),
            a2 / (scale * scale),
        ];

        let mut model = Self {
            coefficients,
            max_residual: 0.0,
            raw_range: (lo, hi),
        };
        model.max_residual = anchors
            .iter()
            .map(|a| (model.evaluate(a.raw) - a.volume).abs())
            .fold(0.0, f64::max);

        debug!(
            c0 = coefficients[0],
            c1 = coefficients[1],
            c2 = coefficients[2],
            max_residual = model.max_residual,
            "Calibration model fitted"
        );
        Ok(model)
    }

    /// Volume for one raw reading.
    pub fn evaluate(&self, raw: f64) -> f64 {
        let [c0, c1, c2] = self.coefficients;
        (c2 * raw + c1) * raw + c0
    }

    /// Volume for every point of a level series.
    pub fn apply(&self, levels: &[f64]) -> Vec<f64> {
        levels.iter().map(|&l| self.evaluate(l)).collect()
    }

    pub fn coefficients(&self) -> [f64; MIN_ANCHORS] {
        self.coefficients
    }

    pub fn max_residual(&self) -> f64 {
        self.max_residual
    }

    pub fn raw_range(&self) -> (f64, f64) {
        self.raw_range
    }

    /// Whether `raw` lies inside the calibrated range.
    pub fn covers(&self, raw: f64) -> bool {
        raw >= self.raw_range.0 && raw <= self.raw_range.1
    }
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve3(
    mut m: [[f64; MIN_ANCHORS]; MIN_ANCHORS],
    mut v: [f64; MIN_ANCHORS],
) -> Option<[f64; MIN_ANCHORS]> {
    // ---
    const EPS: f64 = 1e-12;
    let n = MIN_ANCHORS;

    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < EPS {
            return None;
        }
        m.swap(col, pivot);
        v.swap(col, pivot);

        for row in col + 1..n {
            let f = m[row][col] / m[col][col];
            for k in col..n {
                m[row][k] -= f * m[col][k];
            }
            v[row] -= f * v[col];
        }
    }

    let mut x = [0.0; MIN_ANCHORS];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[row][k] * x[k]).sum();
        x[row] = (v[row] - tail) / m[row][row];
    }
    Some(x)
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    tanks: BTreeMap<String, Vec<CalibrationAnchor>>,
    #[serde(default)]
    vehicles: BTreeMap<String, String>,
}

/// Tank model → calibration curve, plus vehicle → tank model assignments.
#[derive(Debug, Clone, Default)]
pub struct CalibrationRegistry {
    tanks: BTreeMap<String, CalibrationCurve>,
    vehicles: BTreeMap<String, String>,
}

impl CalibrationRegistry {
    // ---
    /// Read and validate a registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        // ---
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_json_str(&text)?;
        info!(
            path = %path.display(),
            tanks = registry.tanks.len(),
            vehicles = registry.vehicles.len(),
            "Calibration registry loaded"
        );
        Ok(registry)
    }

    /// Parse a registry. Every curve is fitted once so a bad table is
    /// reported at load time rather than on first use.
    pub fn from_json_str(text: &str) -> Result<Self, RegistryError> {
        // ---
        let file: RegistryFile = serde_json::from_str(text)?;

        let mut tanks = BTreeMap::new();
        for (tank, anchors) in file.tanks {
            let curve = CalibrationCurve::new(anchors)
                .and_then(|c| CalibrationModel::fit(&c).map(|_| c))
                .map_err(|source| RegistryError::InvalidCurve {
                    tank: tank.clone(),
                    source,
                })?;
            tanks.insert(tank, curve);
        }

        if let Some((vehicle, tank)) = file.vehicles.iter().find(|(_, t)| !tanks.contains_key(*t)) {
            debug!(vehicle, tank, "Vehicle assigned to an unknown tank model");
            return Err(RegistryError::UnknownTank(tank.clone()));
        }

        Ok(Self {
            tanks,
            vehicles: file.vehicles,
        })
    }

    pub fn insert_tank(&mut self, tank: impl Into<String>, curve: CalibrationCurve) {
        self.tanks.insert(tank.into(), curve);
    }

    pub fn assign_vehicle(&mut self, vehicle: impl Into<String>, tank: impl Into<String>) {
        self.vehicles.insert(vehicle.into(), tank.into());
    }

    pub fn tank(&self, tank: &str) -> Result<&CalibrationCurve, RegistryError> {
        self.tanks
            .get(tank)
            .ok_or_else(|| RegistryError::UnknownTank(tank.to_string()))
    }

    /// Curve for a vehicle: its assigned tank model, else a tank model with
    /// the same name as the vehicle.
    pub fn for_vehicle(&self, vehicle: &str) -> Result<&CalibrationCurve, RegistryError> {
        // ---
        let tank = self
            .vehicles
            .get(vehicle)
            .map(String::as_str)
            .unwrap_or(vehicle);
        self.tanks
            .get(tank)
            .ok_or_else(|| RegistryError::UnknownVehicle(vehicle.to_string()))
    }

    pub fn tank_models(&self) -> impl Iterator<Item = &str> {
        self.tanks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const LM_2501: [(f64, f64); 34] = [
        (1.0, 0.0), (49.0, 5.0), (166.0, 10.0), (310.0, 15.0), (453.0, 20.0),
        (591.0, 25.0), (723.0, 30.0), (855.0, 35.0), (985.0, 40.0), (1114.0, 45.0),
        (1244.0, 50.0), (1351.0, 55.0), (1477.0, 60.0), (1599.0, 65.0), (1723.0, 70.0),
        (1843.0, 75.0), (1964.0, 80.0), (2084.0, 85.0), (2205.0, 90.0), (2326.0, 95.0),
        (2433.0, 100.0), (2555.0, 105.0), (2675.0, 110.0), (2798.0, 115.0), (2919.0, 120.0),
        (3035.0, 125.0), (3165.0, 130.0), (3289.0, 135.0), (3413.0, 140.0), (3540.0, 145.0),
        (3669.0, 150.0), (3792.0, 155.0), (3925.0, 160.0), (4095.0, 165.0),
    ];

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{a} != {b} (tol {tol})");
    }

    #[test]
    fn test_exact_quadratic_is_recovered() {
        // ---
        let curve =
            CalibrationCurve::from_pairs((0..6).map(|i| {
                let x = i as f64 * 10.0;
                (x, 1.0 + 2.0 * x + 0.5 * x * x)
            }))
            .unwrap();

        let model = CalibrationModel::fit(&curve).unwrap();
        let [c0, c1, c2] = model.coefficients();
        assert_close(c0, 1.0, 1e-9);
        assert_close(c1, 2.0, 1e-9);
        assert_close(c2, 0.5, 1e-12);
        assert!(model.max_residual() < 1e-9);
    }

    #[test]
    fn test_round_trip_on_real_table() {
        // ---
        let curve = CalibrationCurve::from_pairs(LM_2501).unwrap();
        let model = CalibrationModel::fit(&curve).unwrap();

        let [c0, c1, c2] = model.coefficients();
        assert_close(c0, 1.529_616_66, 1e-6);
        assert_close(c1, 0.039_732_489_6, 1e-9);
        assert_close(c2, 1.956_425_6e-7, 1e-12);

        let raws: Vec<f64> = LM_2501.iter().map(|p| p.0).collect();
        let volumes = model.apply(&raws);
        for (v, (_, expected)) in volumes.iter().zip(LM_2501) {
            assert!((v - expected).abs() <= model.max_residual() + 1e-9);
        }
        assert!(model.max_residual() < 2.6);
        assert_eq!(model.raw_range(), (1.0, 4095.0));
        assert!(model.covers(2000.0));
        assert!(!model.covers(5000.0));
    }

    #[test]
    fn test_two_anchors_fail() {
        // ---
        let curve = CalibrationCurve::from_pairs([(0.0, 0.0), (100.0, 10.0)]).unwrap();
        assert_eq!(
            CalibrationModel::fit(&curve),
            Err(FitError::TooFewAnchors {
                required: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_identical_raw_units_fail() {
        // ---
        let curve =
            CalibrationCurve::from_pairs([(5.0, 0.0), (5.0, 10.0), (5.0, 20.0), (5.0, 30.0)])
                .unwrap();
        assert_eq!(
            CalibrationModel::fit(&curve),
            Err(FitError::DegenerateAnchors { distinct: 1 })
        );

        let curve =
            CalibrationCurve::from_pairs([(1.0, 0.0), (1.0, 1.0), (9.0, 5.0), (9.0, 6.0)])
                .unwrap();
        assert_eq!(
            CalibrationModel::fit(&curve),
            Err(FitError::DegenerateAnchors { distinct: 2 })
        );
    }

    #[test]
    fn test_curve_validation() {
        // ---
        assert_eq!(
            CalibrationCurve::from_pairs([(0.0, 0.0), (10.0, 1.0), (5.0, 2.0)]),
            Err(FitError::NotMonotonic { index: 2 })
        );
        assert_eq!(
            CalibrationCurve::from_pairs([(0.0, 0.0), (f64::NAN, 1.0)]),
            Err(FitError::NonFiniteAnchor { index: 1 })
        );
        // Saturated ends repeat raw values.
        assert!(CalibrationCurve::from_pairs([(1.0, 0.0), (1.0, 5.0), (90.0, 10.0)]).is_ok());
    }

    #[test]
    fn test_registry_lookup() {
        // ---
        let json = r#"{
            "tanks": {
                "LN-7944": [
                    {"raw": 1, "volume": 0}, {"raw": 86, "volume": 5},
                    {"raw": 458, "volume": 10}, {"raw": 834, "volume": 15}
                ]
            },
            "vehicles": { "LL-7944": "LN-7944" }
        }"#;

        let registry = CalibrationRegistry::from_json_str(json).unwrap();
        assert_eq!(registry.for_vehicle("LL-7944").unwrap().len(), 4);
        assert_eq!(registry.for_vehicle("LN-7944").unwrap().len(), 4);
        assert!(matches!(
            registry.for_vehicle("XX-0000"),
            Err(RegistryError::UnknownVehicle(v)) if v == "XX-0000"
        ));
        assert!(matches!(
            registry.tank("nope"),
            Err(RegistryError::UnknownTank(_))
        ));
        assert_eq!(registry.tank_models().collect::<Vec<_>>(), vec!["LN-7944"]);
    }

    #[test]
    fn test_registry_rejects_unusable_table() {
        // ---
        let json = r#"{ "tanks": { "tiny": [ {"raw": 1, "volume": 0}, {"raw": 2, "volume": 5} ] } }"#;
        assert!(matches!(
            CalibrationRegistry::from_json_str(json),
            Err(RegistryError::InvalidCurve { tank, source: FitError::TooFewAnchors { .. } }) if tank == "tiny"
        ));

        let json = r#"{ "tanks": {}, "vehicles": { "LL-1": "missing" } }"#;
        assert!(matches!(
            CalibrationRegistry::from_json_str(json),
            Err(RegistryError::UnknownTank(t)) if t == "missing"
        ));

        assert!(matches!(
            CalibrationRegistry::from_json_str("{ not json"),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_registry_load_from_file() {
        // ---
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let tanks: Vec<String> = LM_2501
            .iter()
            .map(|(r, v)| format!(r#"{{"raw": {r}, "volume": {v}}}"#))
            .collect();
        let json = format!(
            r#"{{"tanks": {{"LM-2501": [{}]}}, "vehicles": {{"LL-2501": "LM-2501"}}}}"#,
            tanks.join(",")
        );
        std::io::Write::write_all(&mut file, json.as_bytes()).unwrap();

        let registry = CalibrationRegistry::load(file.path()).unwrap();
        assert_eq!(registry.for_vehicle("LL-2501").unwrap().len(), 34);

        assert!(matches!(
            CalibrationRegistry::load("/definitely/not/here.json"),
            Err(RegistryError::Io { .. })
        ));
    }
}
