//! Technology parameters and simulator options.
//!
//! Capacitances are given per square micron (area) or per micron (perimeter)
//! in pF; transistor sizes inside the simulator are kept in centimicrons.

use std::fmt;
use std::str::FromStr;

use crate::network::TransistorKind;

/// Which delay model evaluates stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// RC/Thevenin timing model.
    #[default]
    Rc,
    /// Switch-level lattice model with per-node fixed delays.
    Switch,
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rc" | "linear" => Ok(ModelKind::Rc),
            "switch" => Ok(ModelKind::Switch),
            other => Err(format!("unknown model '{}', expected rc or switch", other)),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Rc => write!(f, "rc"),
            ModelKind::Switch => write!(f, "switch"),
        }
    }
}

/// How the RC model times a driven node that settles to X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XChargeModel {
    /// `Rmin * Ca`: the strongest path charges the node.
    #[default]
    MinResistance,
    /// `Ca / |1/Rup.min - 1/Rdown.min|`, never faster than `Rmin * Ca`.
    StrengthDifference,
}

impl FromStr for XChargeModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" | "min-resistance" => Ok(XChargeModel::MinResistance),
            "diff" | "strength-difference" => Ok(XChargeModel::StrengthDifference),
            other => Err(format!("unknown x-charge model '{}'", other)),
        }
    }
}

/// Equivalent resistances of a unit-square device, in ohms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResistanceSpec {
    pub r_static: f64,
    pub dyn_low: f64,
    pub dyn_high: f64,
}

impl ResistanceSpec {
    pub const fn uniform(r: f64) -> Self {
        Self { r_static: r, dyn_low: r, dyn_high: r }
    }
}

/// Converts between nanoseconds, picoseconds and simulator deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timescale {
    pub deltas_per_ns: f64,
}

impl Default for Timescale {
    fn default() -> Self {
        Self { deltas_per_ns: 100.0 }
    }
}

impl Timescale {
    pub fn ns_to_delta(&self, ns: f64) -> u64 {
        (ns * self.deltas_per_ns).max(0.0) as u64
    }

    pub fn delta_to_ns(&self, d: u64) -> f64 {
        d as f64 / self.deltas_per_ns
    }

    pub fn ps_to_delta(&self, ps: f64) -> u64 {
        (ps * 0.001 * self.deltas_per_ns).max(0.0) as u64
    }

    pub fn delta_to_ps(&self, d: f64) -> f64 {
        d * 1000.0 / self.deltas_per_ns
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---- technology ----
    /// Microns per lambda.
    pub lambda: f64,
    /// Gate oxide capacitance, pF/µm².
    pub capga: f64,
    pub cda: f64,
    pub cdp: f64,
    pub cpda: f64,
    pub cpdp: f64,
    pub cma: f64,
    pub cmp: f64,
    pub cpa: f64,
    pub cpp: f64,
    pub cm2a: f64,
    pub cm2p: f64,
    pub low_thresh: f64,
    pub high_thresh: f64,
    pub n_channel: ResistanceSpec,
    pub p_channel: ResistanceSpec,
    pub depletion: ResistanceSpec,

    // ---- simulator options ----
    pub max_errors: usize,
    pub max_parallel: usize,
    pub timescale: Timescale,
    /// Default step, ns.
    pub step_size: f64,
    /// Decay time for undriven charge, ns. Zero disables decay.
    pub decay: f64,
    /// Fixed delay for every transition, ns. Zero uses the model's delays.
    pub unit_delay: f64,
    pub model: ModelKind,
    pub x_charge: XChargeModel,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            capga: 0.0009,
            cda: 0.0001,
            cdp: 0.0006,
            cpda: 0.0001,
            cpdp: 0.0006,
            cma: 0.00003,
            cmp: 0.0,
            cpa: 0.00004,
            cpp: 0.0,
            cm2a: 0.00002,
            cm2p: 0.0,
            low_thresh: 0.3,
            high_thresh: 0.8,
            n_channel: ResistanceSpec { r_static: 7000.0, dyn_low: 4000.0, dyn_high: 13000.0 },
            p_channel: ResistanceSpec { r_static: 15000.0, dyn_low: 26000.0, dyn_high: 9000.0 },
            depletion: ResistanceSpec::uniform(24000.0),
            max_errors: 20,
            max_parallel: 30,
            timescale: Timescale::default(),
            step_size: 10.0,
            decay: 0.0,
            unit_delay: 0.0,
            model: ModelKind::Rc,
            x_charge: XChargeModel::MinResistance,
        }
    }
}

impl SimConfig {
    /// Centimicrons per lambda.
    pub fn lambda_cm(&self) -> f64 {
        self.lambda * 100.0
    }

    pub fn lambda2(&self) -> f64 {
        self.lambda * self.lambda
    }

    /// Gate capacitance per square centimicron.
    pub fn ctga(&self) -> f64 {
        self.capga / (100.0 * 100.0)
    }

    /// Equivalent resistances of a device of the given size (centimicrons).
    ///
    /// A resistor record carries its value in the length field, scaled by
    /// `lambda_cm`, so its width is ignored.
    pub fn equivalent_resistance(&self, kind: TransistorKind, width: i64, length: i64) -> ResistanceSpec {
        let spec = match kind {
            TransistorKind::NChannel => self.n_channel,
            TransistorKind::PChannel => self.p_channel,
            TransistorKind::Depletion => self.depletion,
            TransistorKind::Resistor => {
                return ResistanceSpec::uniform(length as f64 / self.lambda_cm());
            }
        };
        let squares = length as f64 / width.max(1) as f64;
        ResistanceSpec {
            r_static: spec.r_static * squares,
            dyn_low: spec.dyn_low * squares,
            dyn_high: spec.dyn_high * squares,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn timescale_conversions_truncate() {
        let ts = Timescale::default();
        assert_eq!(ts.ns_to_delta(10.0), 1000);
        assert_eq!(ts.ps_to_delta(25.0), 2);
        assert_eq!(ts.ps_to_delta(9.9), 0);
        assert_abs_diff_eq!(ts.delta_to_ps(3.0), 30.0);
        assert_abs_diff_eq!(ts.delta_to_ns(250), 2.5);
    }

    #[test]
    fn resistance_scales_with_squares() {
        let cfg = SimConfig::default();
        let r = cfg.equivalent_resistance(TransistorKind::NChannel, 200, 400);
        assert_abs_diff_eq!(r.r_static, 14000.0);
        assert_abs_diff_eq!(r.dyn_high, 26000.0);
    }

    #[test]
    fn resistor_value_comes_from_length() {
        let cfg = SimConfig::default();
        let r = cfg.equivalent_resistance(TransistorKind::Resistor, 0, 5000 * 100);
        assert_abs_diff_eq!(r.r_static, 5000.0);
        assert_abs_diff_eq!(r.dyn_low, 5000.0);
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("RC".parse::<ModelKind>().unwrap(), ModelKind::Rc);
        assert_eq!("switch".parse::<ModelKind>().unwrap(), ModelKind::Switch);
        assert!("spline".parse::<ModelKind>().is_err());
        assert_eq!("diff".parse::<XChargeModel>().unwrap(), XChargeModel::StrengthDifference);
    }
}
