//! Command scripts.
//!
//! One command per line; `|` starts a comment.
//!
//! ```text
//! h|l|u|x node...        drive high / low / X, or stop driving
//! s [ns]                 step (default step size)
//! c [n]                  run n clock cycles
//! stepsize ns
//! vector name node...
//! set name bits
//! clock name seq...
//! assert name [mask] value
//! back ns
//! flush [ns]
//! ? node...              node report
//! w node...              watch
//! model rc|switch
//! decay ns
//! unitdelay ns
//! ```
//!
//! A failing command is reported with its line number and the script moves
//! on. Only internal faults and I/O errors stop it.

use std::io::Write;

use crate::config::ModelKind;
use crate::error::{Diagnostic, Result, SwitchyardError};
use crate::ir::Located;
use crate::parser::{int, number, tokenize};
use crate::sim::{InputLevel, Simulator};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Drive { level: InputLevel, nodes: Vec<String> },
    Step(Option<f64>),
    Clock(usize),
    StepSize(f64),
    Vector { name: String, nodes: Vec<String> },
    SetVector { name: String, bits: String },
    DefineClock { name: String, sequence: Vec<String> },
    Assert { name: String, mask: Option<String>, value: String },
    Back(f64),
    Flush(Option<f64>),
    Info(Vec<String>),
    Watch(Vec<String>),
    Model(ModelKind),
    Decay(f64),
    UnitDelay(f64),
}

fn command_error(msg: impl Into<String>) -> SwitchyardError {
    SwitchyardError::Command(msg.into())
}

fn ns(token: &str) -> Result<f64> {
    number(token).map_err(command_error)
}

fn names(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Command {
    /// Parse one script line. Blank and comment lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.split('|').next().unwrap_or("");
        let tokens = tokenize(line);
        let Some((&verb, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let want = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(command_error(format!("'{}' takes {} argument(s)", verb, n)))
            }
        };

        let cmd = match verb {
            "h" | "l" | "u" | "x" => {
                let level = verb.chars().next().and_then(InputLevel::from_char).ok_or_else(|| command_error(verb))?;
                Command::Drive { level, nodes: names(args) }
            }
            "s" => match args {
                [] => Command::Step(None),
                [t] => Command::Step(Some(ns(t)?)),
                _ => return Err(command_error("'s' takes at most one argument")),
            },
            "c" => match args {
                [] => Command::Clock(1),
                [n] => Command::Clock(int(n).map_err(command_error)?.max(1) as usize),
                _ => return Err(command_error("'c' takes at most one argument")),
            },
            "stepsize" => {
                want(1)?;
                Command::StepSize(ns(args[0])?)
            }
            "vector" => match args {
                [name, nodes @ ..] if !nodes.is_empty() => Command::Vector { name: name.to_string(), nodes: names(nodes) },
                _ => return Err(command_error("usage: vector name node...")),
            },
            "set" => {
                want(2)?;
                Command::SetVector { name: args[0].to_string(), bits: args[1].to_string() }
            }
            "clock" => match args {
                [name, seq @ ..] => Command::DefineClock { name: name.to_string(), sequence: names(seq) },
                _ => return Err(command_error("usage: clock name value...")),
            },
            "assert" => match args {
                [name, value] => Command::Assert { name: name.to_string(), mask: None, value: value.to_string() },
                [name, mask, value] => Command::Assert {
                    name: name.to_string(),
                    mask: Some(mask.to_string()),
                    value: value.to_string(),
                },
                _ => return Err(command_error("usage: assert name [mask] value")),
            },
            "back" => {
                want(1)?;
                Command::Back(ns(args[0])?)
            }
            "flush" => match args {
                [] => Command::Flush(None),
                [t] => Command::Flush(Some(ns(t)?)),
                _ => return Err(command_error("'flush' takes at most one argument")),
            },
            "?" => Command::Info(names(args)),
            "w" => Command::Watch(names(args)),
            "model" => {
                want(1)?;
                Command::Model(args[0].parse().map_err(command_error)?)
            }
            "decay" => {
                want(1)?;
                Command::Decay(ns(args[0])?)
            }
            "unitdelay" => {
                want(1)?;
                Command::UnitDelay(ns(args[0])?)
            }
            other => return Err(command_error(format!("unknown command '{}'", other))),
        };
        Ok(Some(cmd))
    }

    /// Run against `sim`, writing reports to `out`.
    pub fn execute<W: Write>(&self, sim: &mut Simulator, out: &mut W) -> Result<()> {
        match self {
            Command::Drive { level, nodes } => {
                for n in nodes {
                    sim.set_input(n, *level)?;
                }
            }
            Command::Step(t) => sim.step_ns(*t)?,
            Command::Clock(n) => sim.clock_cycles(*n)?,
            Command::StepSize(t) => sim.set_step_size(*t)?,
            Command::Vector { name, nodes } => {
                let nodes: Vec<&str> = nodes.iter().map(String::as_str).collect();
                sim.define_vector(name, &nodes)?;
            }
            Command::SetVector { name, bits } => sim.set_vector(name, bits)?,
            Command::DefineClock { name, sequence } => {
                let seq: Vec<&str> = sequence.iter().map(String::as_str).collect();
                sim.define_clock(name, &seq)?;
            }
            Command::Assert { name, mask, value } => sim.assert_value(name, mask.as_deref(), value)?,
            Command::Back(t) => sim.back(*t)?,
            Command::Flush(t) => sim.flush(*t)?,
            Command::Info(nodes) => {
                for n in nodes {
                    let info = sim.node_info(n)?;
                    crate::output::write_node_info(&info, out)?;
                }
            }
            Command::Watch(nodes) => {
                for n in nodes {
                    sim.watch(n)?;
                }
            }
            Command::Model(kind) => sim.set_model(*kind),
            Command::Decay(t) => sim.set_decay(*t),
            Command::UnitDelay(t) => sim.set_unit_delay(*t),
        }
        Ok(())
    }
}

/// A parsed script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub name: String,
    pub commands: Vec<Located<Command>>,
}

impl Script {
    /// Parse every line; bad lines are returned as diagnostics and left out.
    pub fn parse(name: &str, text: &str) -> (Script, Vec<Diagnostic>) {
        let mut commands = Vec::new();
        let mut errors = Vec::new();
        for (i, line) in text.lines().enumerate() {
            match Command::parse(line) {
                Ok(Some(item)) => commands.push(Located { line: i + 1, item }),
                Ok(None) => {}
                Err(e) => errors.push(Diagnostic { file: name.to_string(), line: i + 1, message: e.to_string() }),
            }
        }
        (Script { name: name.to_string(), commands }, errors)
    }

    /// Run every command in order. Command failures are collected; internal
    /// and I/O errors abort the run.
    pub fn run<W: Write>(&self, sim: &mut Simulator, out: &mut W) -> Result<Vec<Diagnostic>> {
        let mut failures = Vec::new();
        for cmd in &self.commands {
            match cmd.item.execute(sim, out) {
                Ok(()) => {}
                Err(e @ (SwitchyardError::Internal(_) | SwitchyardError::Io(_))) => return Err(e),
                Err(e) => {
                    let diag = Diagnostic { file: self.name.clone(), line: cmd.line, message: e.to_string() };
                    tracing::debug!("{}", diag);
                    failures.push(diag);
                }
            }
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::network::Potential;

    const INVERTER: &str = "p in out vdd 2 4\nn in out gnd 2 2\n";

    fn sim() -> Simulator {
        Simulator::load("inv.sim", INVERTER, SimConfig::default()).unwrap()
    }

    // ---- parse tests ----

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(Command::parse("   | just a comment").unwrap(), None);
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("s 5 | run a bit").unwrap(), Some(Command::Step(Some(5.0))));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(
            Command::parse("h a b").unwrap(),
            Some(Command::Drive { level: InputLevel::High, nodes: vec!["a".into(), "b".into()] })
        );
        assert_eq!(Command::parse("c 0").unwrap(), Some(Command::Clock(1)));
        assert_eq!(Command::parse("model switch").unwrap(), Some(Command::Model(ModelKind::Switch)));
        assert_eq!(
            Command::parse("assert bus 10 01").unwrap(),
            Some(Command::Assert { name: "bus".into(), mask: Some("10".into()), value: "01".into() })
        );
        assert!(Command::parse("stepsize").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    // ---- run tests ----

    #[test]
    fn failures_carry_line_numbers_and_do_not_stop_the_script() {
        let text = "l in\ns\nassert out 0\nh in\ns\nassert out 0\n";
        let (script, errors) = Script::parse("t.cmd", text);
        assert!(errors.is_empty());
        let mut s = sim();
        let mut out = Vec::new();
        let failures = script.run(&mut s, &mut out).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].line, 3);
        assert_eq!(s.value("out").unwrap(), Potential::Low);
    }

    #[test]
    fn info_writes_a_report() {
        let (script, _) = Script::parse("t.cmd", "h in\ns\n? out\n");
        let mut s = sim();
        let mut out = Vec::new();
        script.run(&mut s, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("out=0"), "{}", text);
    }
}
