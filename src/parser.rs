//! `.sim` network file parser.
//!
//! Parses the line-oriented transistor netlist format into records.
//!
//! # Supported syntax
//!
//! ```text
//! | units: 100 tech: scmos         (header, line 1 only)
//! n|e|p|d gate source drain [l w [x y [g=.. s=A_a,P_p d=A_a,P_p]]]
//! r a b ohms                      (resistor)
//! c|C node pF                     (lumped capacitance)
//! c|C a b fF                      (coupling capacitance)
//! N node ma pa da dp              (old-style area capacitance)
//! M node ... (10 area/perimeter values)
//! = name alias...                 (aliases)
//! t node vlow vhigh               (thresholds)
//! D node tplh tphl                (user delay, ns)
//! R ... / A ...                   (ignored)
//! ```
//!
//! A bad line is reported through [`Diagnostics`] and skipped; the parse only
//! fails when the error budget runs out.

use nom::bytes::complete::{tag, take_until, take_while, take_while1};
use nom::character::complete::digit1;
use nom::combinator::opt;
use nom::multi::separated_list0;
use nom::number::complete::double;
use nom::sequence::preceded;
use nom::IResult;
use nom::Parser;

use crate::error::{Diagnostics, Result};
use crate::ir::{Junction, Located, Position, Record, SimFile};
use crate::network::TransistorKind;

/// Parse a `.sim` file into records, reporting bad lines to `diags`.
pub fn parse(input: &str, diags: &mut Diagnostics) -> Result<SimFile> {
    let _span = tracing::debug_span!("parse", file = diags.file()).entered();
    let mut records = Vec::new();
    let mut reported_missing_geometry = false;

    for (line_num, raw_line) in input.lines().enumerate() {
        let line = line_num + 1;
        let tokens = tokenize(raw_line);
        let Some(first) = tokens.first().and_then(|t| t.chars().next()) else {
            continue;
        };

        let parsed = match first {
            '|' => {
                if line > 1 {
                    continue;
                }
                parse_header(&tokens)
            }
            'e' | 'n' => parse_transistor(TransistorKind::NChannel, &tokens),
            'p' => parse_transistor(TransistorKind::PChannel, &tokens),
            'd' => parse_transistor(TransistorKind::Depletion, &tokens),
            'r' => parse_resistor(&tokens),
            'N' => parse_node_area(&tokens),
            'M' => parse_node_area_ext(&tokens),
            'c' | 'C' => parse_capacitance(&tokens),
            '=' => parse_alias(&tokens),
            't' => parse_threshold(&tokens),
            'D' => parse_user_delay(&tokens),
            'R' | 'A' => Ok(Record::Ignored(first)),
            _ => Err(format!("Unrecognized input line ({})", tokens[0])),
        };

        match parsed {
            Ok(record) => {
                if let Record::Transistor { position: None, .. } = record {
                    if !reported_missing_geometry {
                        reported_missing_geometry = true;
                        diags.report(line, "no position, area/perim S/D attributes on fet")?;
                    }
                }
                records.push(Located { line, item: record });
            }
            Err(msg) => diags.report(line, msg)?,
        }
    }

    Ok(SimFile { name: diags.file().to_string(), records })
}

// ---------------------------------------------------------------------------
// Token parsers
// ---------------------------------------------------------------------------

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\r'
}

/// Split a line into blank-separated tokens.
pub(crate) fn tokenize(line: &str) -> Vec<&str> {
    let token = take_while1(|c: char| !is_blank(c));
    let gap = take_while1(is_blank);
    let parsed: IResult<&str, Vec<&str>> =
        preceded(take_while(is_blank), separated_list0(gap, token)).parse(line);
    parsed.map(|(_, toks)| toks).unwrap_or_default()
}

/// Leading decimal number of a token, the way C `atof` reads it, except that a
/// token with no number at all is an error.
pub(crate) fn number(token: &str) -> std::result::Result<f64, String> {
    double::<&str, nom::error::Error<&str>>(token)
        .map(|(_, v)| v)
        .map_err(|_| format!("bad number '{}'", token))
}

pub(crate) fn int(token: &str) -> std::result::Result<i32, String> {
    let parsed: IResult<&str, (Option<&str>, &str)> = (opt(tag("-")), digit1).parse(token);
    let (_, (sign, digits)) = parsed.map_err(|_| format!("bad integer '{}'", token))?;
    let v: i32 = digits.parse().map_err(|_| format!("bad integer '{}'", token))?;
    Ok(if sign.is_some() { -v } else { v })
}

/// Integer following `key` anywhere inside `token`, e.g. `A_` in `s=A_12,P_8`.
fn tagged_value(token: &str, key: &str) -> Option<f64> {
    let found: IResult<&str, &str> = preceded(take_until(key), tag(key)).parse(token);
    let (rest, _) = found.ok()?;
    let digits: IResult<&str, &str> = digit1(rest);
    Some(digits.ok().and_then(|(_, d)| d.parse().ok()).unwrap_or(0.0))
}

/// `s=A_<area>,P_<perim>` or `d=...`; other attribute tokens yield `None`.
fn junction(token: &str) -> Option<(char, Junction)> {
    let side = token.chars().next()?;
    let area = tagged_value(token, "A_")?;
    let perimeter = tagged_value(token, "P_")?;
    Some((side, Junction { area, perimeter }))
}

fn wrong_args(tokens: &[&str]) -> String {
    let kind = tokens.first().and_then(|t| t.chars().next()).unwrap_or('?');
    format!("Wrong number of args for '{}'", kind)
}

// ---------------------------------------------------------------------------
// Record parsers
// ---------------------------------------------------------------------------

fn parse_header(tokens: &[&str]) -> std::result::Result<Record, String> {
    let lambda = match tokens.get(2) {
        Some(units) => Some(number(units)? / 100.0),
        None => None,
    };
    Ok(Record::Header { lambda, has_area_caps: tokens.len() >= 6 })
}

fn parse_transistor(kind: TransistorKind, tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() < 4 || tokens.len() > 11 {
        return Err(wrong_args(tokens));
    }

    let size = if tokens.len() > 5 {
        Some((number(tokens[4])?, number(tokens[5])?))
    } else {
        None
    };

    let mut position = None;
    let mut source_junction = None;
    let mut drain_junction = None;
    if tokens.len() > 7 {
        position = Some(Position { x: int(tokens[6])?, y: int(tokens[7])? });
        for tok in &tokens[8..] {
            match junction(tok) {
                Some(('s', j)) => source_junction = Some(j),
                Some(('d', j)) => drain_junction = Some(j),
                _ => {}
            }
        }
    }

    Ok(Record::Transistor {
        kind,
        gate: tokens[1].to_string(),
        source: tokens[2].to_string(),
        drain: tokens[3].to_string(),
        size,
        position,
        source_junction,
        drain_junction,
    })
}

fn parse_resistor(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() != 4 {
        return Err(wrong_args(tokens));
    }
    Ok(Record::Resistor {
        a: tokens[1].to_string(),
        b: tokens[2].to_string(),
        ohms: number(tokens[3])?,
    })
}

fn parse_node_area(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() != 8 {
        return Err(wrong_args(tokens));
    }
    let mut areas = [0.0; 4];
    for (slot, tok) in areas.iter_mut().zip(&tokens[4..8]) {
        *slot = number(tok)?;
    }
    Ok(Record::NodeArea { node: tokens[1].to_string(), areas })
}

fn parse_node_area_ext(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() != 14 {
        return Err(wrong_args(tokens));
    }
    let mut areas = [0.0; 10];
    for (slot, tok) in areas.iter_mut().zip(&tokens[4..14]) {
        *slot = number(tok)?;
    }
    Ok(Record::NodeAreaExt { node: tokens[1].to_string(), areas })
}

fn parse_capacitance(tokens: &[&str]) -> std::result::Result<Record, String> {
    match tokens.len() {
        3 => Ok(Record::Lumped { node: tokens[1].to_string(), pf: number(tokens[2])? }),
        4 => Ok(Record::Coupling {
            a: tokens[1].to_string(),
            b: tokens[2].to_string(),
            ff: number(tokens[3])?,
        }),
        _ => Err(wrong_args(tokens)),
    }
}

fn parse_alias(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() < 3 {
        return Err(wrong_args(tokens));
    }
    Ok(Record::Alias { names: tokens[1..].iter().map(|s| s.to_string()).collect() })
}

fn parse_threshold(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() != 4 {
        return Err(wrong_args(tokens));
    }
    Ok(Record::Threshold {
        node: tokens[1].to_string(),
        vlow: number(tokens[2])?,
        vhigh: number(tokens[3])?,
    })
}

fn parse_user_delay(tokens: &[&str]) -> std::result::Result<Record, String> {
    if tokens.len() != 4 {
        return Err(wrong_args(tokens));
    }
    Ok(Record::UserDelay {
        node: tokens[1].to_string(),
        tplh: number(tokens[2])?,
        tphl: number(tokens[3])?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
