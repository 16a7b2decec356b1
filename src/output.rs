//! Report and history output.

use crate::error::Result;
use crate::network::Potential;
use crate::sim::{NodeInfo, Simulator};
use std::io::Write;

/// Write the committed transitions of the given nodes as CSV, one row per
/// transition, ordered by time then by node order.
///
/// Format:
/// ```csv
/// Time_ns,Node,Value
/// 0,out,X
/// 0.22,out,1
/// 10.2,out,0
/// ```
pub fn write_history_csv<W: Write>(sim: &Simulator, nodes: &[String], writer: &mut W) -> Result<()> {
    let mut rows: Vec<(f64, usize, Potential)> = Vec::new();
    for (i, name) in nodes.iter().enumerate() {
        for (t, v) in sim.history(name)? {
            rows.push((t, i, v));
        }
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    writeln!(writer, "Time_ns,Node,Value")?;
    for (t, i, v) in rows {
        writeln!(writer, "{},{},{}", t, nodes[i], v)?;
    }
    Ok(())
}

/// Write final values as CSV.
///
/// Format:
/// ```csv
/// Node,Value
/// out,1
/// ```
pub fn write_values_csv<W: Write>(values: &[(String, Potential)], writer: &mut W) -> Result<()> {
    writeln!(writer, "Node,Value")?;
    for (name, v) in values {
        writeln!(writer, "{},{}", name, v)?;
    }
    Ok(())
}

/// One node report:
///
/// ```text
/// out=1 [cap 0.05001 pF, vl 0.3, vh 0.8, changed @ 0.22ns by in] (input, user-delay 1.2/0.8ns)
///   pending: 0@12.5ns
/// ```
pub fn write_node_info<W: Write>(info: &NodeInfo, writer: &mut W) -> Result<()> {
    write!(
        writer,
        "{}={} [cap {} pF, vl {}, vh {}, changed @ {}ns",
        info.name, info.value, info.capacitance, info.vlow, info.vhigh, info.last_change
    )?;
    if let Some(cause) = &info.cause {
        write!(writer, " by {}", cause)?;
    }
    write!(writer, "]")?;
    let mut notes: Vec<String> = info.flags.iter().map(|f| f.to_string()).collect();
    if let Some((tplh, tphl)) = info.user_delay {
        notes.retain(|f| f != "user-delay");
        notes.push(format!("user-delay {}/{}ns", tplh, tphl));
    }
    if !notes.is_empty() {
        write!(writer, " ({})", notes.join(", "))?;
    }
    writeln!(writer)?;

    if !info.pending.is_empty() {
        let events: Vec<String> = info.pending.iter().map(|(t, v)| format!("{}@{}ns", v, t)).collect();
        writeln!(writer, "  pending: {}", events.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_lists_flags_and_events() {
        let info = NodeInfo {
            name: "out".into(),
            value: Potential::High,
            flags: vec!["input", "user-delay"],
            vlow: 0.3,
            vhigh: 0.8,
            capacitance: 0.05,
            user_delay: Some((1.5, 0.5)),
            last_change: 2.0,
            cause: Some("in".into()),
            pending: vec![(12.5, Potential::Low)],
        };
        let mut out = Vec::new();
        write_node_info(&info, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "out=1 [cap 0.05 pF, vl 0.3, vh 0.8, changed @ 2ns by in] (input, user-delay 1.5/0.5ns)\n  pending: 0@12.5ns\n"
        );
    }

    #[test]
    fn values_csv() {
        let mut out = Vec::new();
        write_values_csv(&[("a".into(), Potential::X), ("b".into(), Potential::Low)], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Node,Value\na,X\nb,0\n");
    }
}
