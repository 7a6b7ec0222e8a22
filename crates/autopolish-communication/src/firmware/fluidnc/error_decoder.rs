//! GRBL/FluidNC error and alarm code descriptions

/// Describe a numeric `error:N` code
pub fn decode_error(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Letter without a value in a G-code word",
        2 => "Missing or malformed numeric value",
        3 => "Unsupported '$' system command",
        4 => "Negative value where a positive one is required",
        5 => "Homing is disabled",
        6 => "Step pulse time below minimum",
        7 => "Settings read failed; defaults restored",
        8 => "'$' command requires Idle state",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits need homing enabled",
        11 => "Line too long",
        12 => "Setting exceeds maximum step rate",
        13 => "Safety door opened",
        14 => "Startup line too long",
        15 => "Jog target beyond machine travel",
        16 => "Malformed jog command",
        17 => "Laser mode needs PWM output",
        20 => "Unsupported G-code command",
        21 => "Two commands from the same modal group",
        22 => "Feed rate not set",
        23 => "Command needs an integer value",
        24 => "Two commands in the block need axis words",
        25 => "Repeated G-code word",
        26 => "Command needs axis words but none given",
        27 => "Line number out of range",
        28 => "Command missing P or L value",
        29 => "Unsupported work coordinate system",
        30 => "G53 needs G0 or G1 motion mode",
        31 => "Unused axis words with G80 active",
        32 => "Arc without axis words in the selected plane",
        33 => "Invalid motion target",
        34 => "Arc radius geometry error",
        35 => "Arc missing IJK offset",
        36 => "Unused words left in block",
        37 => "Tool length offset on wrong axis",
        38 => "Tool number too large",
        _ => return None,
    };
    Some(text)
}

/// Describe a numeric `ALARM:N` code
pub fn decode_alarm(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit triggered; position lost",
        2 => "Soft limit: target beyond machine travel",
        3 => "Reset during motion; position lost",
        4 => "Probe not in expected initial state",
        5 => "Probe did not make contact",
        6 => "Homing reset",
        7 => "Homing failed: safety door opened",
        8 => "Homing failed: could not clear limit switch",
        9 => "Homing failed: limit switch not found",
        10 => "Homing failed: second switch not found",
        _ => return None,
    };
    Some(text)
}

/// Append the description of `code` to `line` when one is known
pub fn describe(line: &str, code: Option<u8>, alarm: bool) -> String {
    let text = code.and_then(|c| if alarm { decode_alarm(c) } else { decode_error(c) });
    match text {
        Some(text) => format!("{} ({})", line, text),
        None => line.to_string(),
    }
}
