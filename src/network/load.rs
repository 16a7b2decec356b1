//! Applying parsed `.sim` records to a network.

use crate::config::SimConfig;
use crate::error::{Diagnostics, Result};
use crate::ir::{Junction, Record, SimFile};
use crate::network::{Network, NodeFlags, Resistance, TransistorKind};

/// Load-wide state that outlives a single record.
#[derive(Default)]
struct LoadState {
    warned_r: bool,
    warned_a: bool,
}

impl Network {
    /// Add every record of `file` to the network.
    ///
    /// Bad records are reported to `diags` and skipped. Transistors are left
    /// unconnected; call [`Network::connect`] and the merge pass afterwards.
    pub fn load(&mut self, file: &SimFile, config: &SimConfig, diags: &mut Diagnostics) -> Result<()> {
        let _span = tracing::info_span!("load", file = %file.name).entered();
        let mut state = LoadState::default();
        for rec in &file.records {
            if let Err(msg) = self.apply(&rec.item, config, &mut state) {
                diags.report(rec.line, msg)?;
            }
        }
        tracing::info!(
            nodes = self.counts.nodes,
            aliases = self.counts.aliases,
            transistors = self.transistor_count(),
            lambda = config.lambda,
            "network loaded"
        );
        Ok(())
    }

    fn apply(&mut self, record: &Record, config: &SimConfig, state: &mut LoadState) -> std::result::Result<(), String> {
        let lambda = config.lambda;
        let lambda2 = config.lambda2();
        match record {
            Record::Header { lambda: file_lambda, has_area_caps } => {
                if let Some(l) = file_lambda {
                    if (l - lambda).abs() > f64::EPSILON {
                        tracing::warn!(sim_lambda = l, config_lambda = lambda, "sim file lambda differs, using config lambda");
                    }
                }
                if *has_area_caps && [config.cda, config.cdp, config.cpda, config.cpdp].contains(&0.0) {
                    tracing::warn!("missing area/perim cap values are zero");
                }
            }
            Record::Transistor { kind, gate, source, drain, size, position, source_junction, drain_junction } => {
                let lcm = config.lambda_cm();
                let (length, width) = match size {
                    Some((l, w)) => ((l * lcm) as i64, (w * lcm) as i64),
                    None => ((2.0 * lcm) as i64, (2.0 * lcm) as i64),
                };
                if width <= 0 || length <= 0 {
                    return Err(format!("Bad transistor width={} or length={}", width, length));
                }
                let g = self.get_or_create(gate, config);
                let s = self.get_or_create(source, config);
                let d = self.get_or_create(drain, config);

                let rs = config.equivalent_resistance(*kind, width, length);
                let r = Resistance { r_static: rs.r_static, dyn_low: rs.dyn_low, dyn_high: rs.dyn_high, width, length };
                self.add_transistor(*kind, g, s, d, r, position.as_ref().map(|p| (p.x, p.y)));

                self.node_mut(g).ncap += length as f64 * width as f64 * config.ctga();
                let (ca, cp) = match kind {
                    TransistorKind::PChannel => (config.cpda, config.cpdp),
                    _ => (config.cda, config.cdp),
                };
                let junction_cap = |j: &Option<Junction>| {
                    j.map_or(0.0, |j| j.area * lambda2 * ca + j.perimeter * lambda * cp)
                };
                self.node_mut(s).ncap += junction_cap(source_junction);
                self.node_mut(d).ncap += junction_cap(drain_junction);
            }
            Record::Resistor { a, b, ohms } => {
                let length = (ohms * config.lambda_cm()) as i64;
                let rs = config.equivalent_resistance(TransistorKind::Resistor, 0, length);
                let r = Resistance { r_static: rs.r_static, dyn_low: rs.dyn_low, dyn_high: rs.dyn_high, width: 0, length };
                let a = self.get_or_create(a, config);
                let b = self.get_or_create(b, config);
                let vdd = self.power();
                self.add_transistor(TransistorKind::Resistor, vdd, a, b, r, None);
            }
            Record::NodeArea { node, areas } => {
                let n = self.get_or_create(node, config);
                self.node_mut(n).ncap += areas[0] * config.cma * lambda2
                    + areas[1] * config.cpa * lambda2
                    + areas[2] * config.cda * lambda2
                    + areas[3] * 2.0 * config.cdp * lambda;
            }
            Record::NodeAreaExt { node, areas } => {
                let n = self.get_or_create(node, config);
                let per_area = [config.cm2a, config.cma, config.cpa, config.cda, config.cpda];
                let per_perim = [config.cm2p, config.cmp, config.cpp, config.cdp, config.cpdp];
                let cap: f64 = (0..5)
                    .map(|i| areas[2 * i] * per_area[i] * lambda2 + areas[2 * i + 1] * 2.0 * per_perim[i] * lambda)
                    .sum();
                self.node_mut(n).ncap += cap;
            }
            Record::Lumped { node, pf } => {
                let n = self.get_or_create(node, config);
                self.node_mut(n).ncap += pf;
            }
            Record::Coupling { a, b, ff } => {
                let cap = ff / 1000.0;
                let n = self.get_or_create(a, config);
                let m = self.get_or_create(b, config);
                let gnd = self.ground();
                if n != m {
                    for id in [n, m] {
                        if id != gnd {
                            self.node_mut(id).ncap += cap;
                        }
                    }
                } else if n == gnd {
                    self.node_mut(n).ncap += cap;
                }
            }
            Record::Alias { names } => {
                let target = self.get_or_create(&names[0], config);
                let mut failure = None;
                for name in &names[1..] {
                    let alias = self.get_or_create(name, config);
                    if let Err(msg) = self.make_alias(target, alias) {
                        failure = Some(msg);
                    }
                }
                if let Some(msg) = failure {
                    return Err(msg);
                }
            }
            Record::Threshold { node, vlow, vhigh } => {
                let n = self.get_or_create(node, config);
                let nd = self.node_mut(n);
                nd.vlow = *vlow;
                nd.vhigh = *vhigh;
            }
            Record::UserDelay { node, tplh, tphl } => {
                let n = self.get_or_create(node, config);
                let ts = config.timescale;
                let nd = self.node_mut(n);
                nd.flags.insert(NodeFlags::USERDELAY);
                nd.tplh = ts.ns_to_delta(*tplh);
                nd.tphl = ts.ns_to_delta(*tphl);
            }
            Record::Ignored('R') => {
                if !std::mem::replace(&mut state.warned_r, true) {
                    tracing::warn!("ignoring lumped-resistance ('R' construct)");
                }
            }
            Record::Ignored(_) => {
                if !std::mem::replace(&mut state.warned_a, true) {
                    tracing::warn!("ignoring attribute line ('A' construct)");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use approx::assert_abs_diff_eq;

    fn load(text: &str) -> (Network, Diagnostics) {
        let cfg = SimConfig::default();
        let mut diags = Diagnostics::new("t.sim", 20);
        let file = parser::parse(text, &mut diags).unwrap();
        let mut net = Network::new(&cfg);
        net.load(&file, &cfg, &mut diags).unwrap();
        (net, diags)
    }

    #[test]
    fn transistor_adds_gate_capacitance() {
        let (net, diags) = load("n in Gnd out 2 4 0 0\n");
        assert_eq!(diags.count(), 0);
        let cfg = SimConfig::default();
        let gate = net.find("in").unwrap();
        // 200 x 400 centimicrons of gate
        assert_abs_diff_eq!(net.node(gate).ncap, 0.00001 + 200.0 * 400.0 * cfg.ctga(), epsilon = 1e-12);
        assert_eq!(net.transistor_count(), 1);
        assert_eq!(net.trans(crate::network::TransId(0)).r.length, 200);
    }

    #[test]
    fn junction_capacitance_by_channel() {
        let (net, _) = load("p g Vdd out 2 2 0 0 g=x s=A_10,P_4 d=A_20,P_6\n");
        let cfg = SimConfig::default();
        let out = net.find("out").unwrap();
        let expected = 0.00001 + 20.0 * cfg.cpda + 6.0 * cfg.cpdp;
        assert_abs_diff_eq!(net.node(out).ncap, expected, epsilon = 1e-12);
    }

    #[test]
    fn zero_width_is_rejected() {
        let (net, diags) = load("n a b c 2 0 0 0\n");
        assert_eq!(net.transistor_count(), 0);
        assert!(diags.entries()[0].message.starts_with("Bad transistor width=0"));
    }

    #[test]
    fn coupling_cap_skips_ground_side() {
        let (net, _) = load("c a Gnd 2000\nc a a 1000\n");
        let a = net.find("a").unwrap();
        assert_abs_diff_eq!(net.node(a).ncap, 0.00001 + 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(net.node(net.ground()).ncap, 0.00001, epsilon = 1e-12);
    }

    #[test]
    fn aliasing_rails_is_an_error() {
        let (net, diags) = load("= Vdd Gnd\n= x y\n");
        assert_eq!(diags.count(), 1);
        assert_eq!(diags.entries()[0].message, "Can't alias the power supplies");
        assert_eq!(net.find("y"), net.find("x"));
    }

    #[test]
    fn user_delay_converts_to_deltas() {
        let (net, _) = load("D out 1.5 0.2\n");
        let out = net.node(net.find("out").unwrap());
        assert!(out.flags.contains(NodeFlags::USERDELAY));
        assert_eq!(out.tplh, 150);
        assert_eq!(out.tphl, 20);
    }

    #[test]
    fn resistor_is_gated_by_power() {
        let (net, _) = load("r a b 5000\n");
        let t = net.trans(crate::network::TransId(0));
        assert_eq!(t.kind, TransistorKind::Resistor);
        assert_eq!(t.gate, net.power());
        assert_abs_diff_eq!(t.r.r_static, 5000.0);
    }
}
