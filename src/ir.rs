//! Network file intermediate representation.
//!
//! The parser turns each `.sim` line into a `Record`; `Network::load` applies
//! the records to build the node/transistor network.

use crate::network::TransistorKind;

/// Node name as written in the file (case is preserved, lookups are not
/// case-sensitive).
pub type NodeName = String;

/// Source or drain junction geometry from an `s=A_..,P_..` attribute, in
/// lambda² and lambda.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Junction {
    pub area: f64,
    pub perimeter: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// One record of a `.sim` file.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// `| units: 100 tech: ...`, honored on line 1 only.
    Header { lambda: Option<f64>, has_area_caps: bool },
    Transistor {
        kind: TransistorKind,
        gate: NodeName,
        source: NodeName,
        drain: NodeName,
        /// (length, width) in lambda; `None` means the 2x2 default.
        size: Option<(f64, f64)>,
        position: Option<Position>,
        source_junction: Option<Junction>,
        drain_junction: Option<Junction>,
    },
    /// `r a b value`: a resistor gated by the power rail.
    Resistor { a: NodeName, b: NodeName, ohms: f64 },
    /// `N name metal poly diff diff-perim` (old format).
    NodeArea { node: NodeName, areas: [f64; 4] },
    /// `M name m2a m2p ma mp pa pp da dp pda pdp` (new format).
    NodeAreaExt { node: NodeName, areas: [f64; 10] },
    /// `c name pF`
    Lumped { node: NodeName, pf: f64 },
    /// `c a b fF`
    Coupling { a: NodeName, b: NodeName, ff: f64 },
    /// `= name alias...`
    Alias { names: Vec<NodeName> },
    /// `t name vlow vhigh`
    Threshold { node: NodeName, vlow: f64, vhigh: f64 },
    /// `D name tplh tphl`, in ns.
    UserDelay { node: NodeName, tplh: f64, tphl: f64 },
    /// `R` or `A` lines, accepted and dropped.
    Ignored(char),
}

/// A record with the 1-based line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub line: usize,
    pub item: T,
}

/// The parsed contents of one `.sim` file.
#[derive(Debug, Clone, Default)]
pub struct SimFile {
    pub name: String,
    pub records: Vec<Located<Record>>,
}
