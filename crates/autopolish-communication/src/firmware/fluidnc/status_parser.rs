//! Status report parsing
//!
//! Two frame shapes are understood:
//!
//! - GRBL angle-bracket reports: `<Idle|MPos:0.000,0.000,-5.000|FS:0,0|WCO:0,0,0>`
//! - FluidNC JSON reports, either flat (`{"state":"Idle","mpos":[..]}`) or
//!   nested under a status-report object (`{"sr":{"state":"Idle",..}}`)
//!
//! A frame either parses completely or not at all; a partially understood
//! frame never produces a status.

use autopolish_core::{MachineState, MachineStatus, Overrides};
use serde_json::{Map, Value};

/// Parser for controller status frames
pub struct StatusParser;

impl StatusParser {
    /// Parse any supported status frame
    pub fn parse(line: &str) -> Option<MachineStatus> {
        let line = line.trim();
        if line.starts_with('<') {
            Self::parse_angle(line)
        } else if line.starts_with('{') {
            Self::parse_json(line)
        } else {
            None
        }
    }

    /// Parse an angle-bracket status report.
    ///
    /// Every field after the state must be `KEY:value`. Unknown keys are
    /// ignored; a recognised key with unparseable values rejects the frame.
    /// When only one of `MPos`/`WPos` is present together with `WCO`, the
    /// other is derived from it.
    pub fn parse_angle(line: &str) -> Option<MachineStatus> {
        let inner = line.trim().strip_prefix('<')?.strip_suffix('>')?;
        let mut fields = inner.split('|');

        let state_field = fields.next()?.trim();
        if state_field.is_empty()
            || !state_field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ':')
        {
            return None;
        }

        let mut status = MachineStatus {
            state: MachineState::parse(state_field),
            raw_line: line.trim().to_string(),
            ..Default::default()
        };
        let mut offset: Option<Vec<f64>> = None;

        for field in fields {
            let (key, value) = field.split_once(':')?;
            match key {
                "MPos" => status.machine_position = Some(parse_axes(value)?),
                "WPos" => status.work_position = Some(parse_axes(value)?),
                "WCO" => offset = Some(parse_axes(value)?),
                "FS" => {
                    let values = parse_numbers(value)?;
                    status.feed = values.first().copied();
                    status.spindle = values.get(1).copied();
                }
                "F" => status.feed = Some(value.trim().parse().ok()?),
                "Ov" => status.overrides = Some(parse_overrides(value)?),
                _ => {}
            }
        }

        if let Some(wco) = offset {
            match (&status.machine_position, &status.work_position) {
                (Some(mpos), None) => {
                    status.work_position = Some(combine(mpos, &wco, |m, o| m - o));
                }
                (None, Some(wpos)) => {
                    status.machine_position = Some(combine(wpos, &wco, |w, o| w + o));
                }
                _ => {}
            }
        }

        Some(status)
    }

    /// Parse a JSON status object.
    ///
    /// Keys are looked up first at the top level, then under `sr`. Frames
    /// that carry none of `state`, `mpos`, `wpos` or `fs` are rejected.
    pub fn parse_json(line: &str) -> Option<MachineStatus> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        let root = value.as_object()?;
        let nested = root.get("sr").and_then(Value::as_object);
        let get = |key: &str| lookup(root, nested, key);

        let state = get("state").or_else(|| get("stat"));
        let mpos = get("mpos");
        let wpos = get("wpos");
        let fs = get("fs");
        if state.is_none() && mpos.is_none() && wpos.is_none() && fs.is_none() {
            return None;
        }

        let mut status = MachineStatus {
            state: state
                .and_then(Value::as_str)
                .map(MachineState::parse)
                .unwrap_or_default(),
            machine_position: mpos.and_then(json_numbers),
            work_position: wpos.and_then(json_numbers),
            raw_line: line.trim().to_string(),
            ..Default::default()
        };

        if let Some(values) = fs.and_then(json_numbers) {
            status.feed = values.first().copied();
            status.spindle = values.get(1).copied();
        }
        if let Some(values) = get("ov").and_then(json_numbers) {
            if let [feed, rapid, spindle, ..] = values[..] {
                status.overrides = Some(Overrides {
                    feed: feed as u16,
                    rapid: rapid as u16,
                    spindle: spindle as u16,
                });
            }
        }

        Some(status)
    }
}

fn lookup<'a>(
    root: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
    key: &str,
) -> Option<&'a Value> {
    root.get(key)
        .or_else(|| nested.and_then(|sr| sr.get(key)))
        .filter(|v| !v.is_null())
}

fn json_numbers(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

fn parse_numbers(value: &str) -> Option<Vec<f64>> {
    value
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

fn parse_axes(value: &str) -> Option<Vec<f64>> {
    let axes = parse_numbers(value)?;
    (axes.len() >= 3).then_some(axes)
}

fn parse_overrides(value: &str) -> Option<Overrides> {
    let values: Vec<u16> = value
        .split(',')
        .map(|v| v.trim().parse::<u16>().ok())
        .collect::<Option<_>>()?;
    match values[..] {
        [feed, rapid, spindle, ..] => Some(Overrides {
            feed,
            rapid,
            spindle,
        }),
        _ => None,
    }
}

fn combine(a: &[f64], b: &[f64], op: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter()
        .enumerate()
        .map(|(i, &v)| op(v, b.get(i).copied().unwrap_or(0.0)))
        .collect()
}
