//! Console input grammar.
//!
//! Plain lines are caller speech as a final recognizer result; lines starting with `~` are
//! interim results. Lines starting with `/` are operator commands.

use omni_voice::GeoPoint;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Speech { text: String, is_final: bool },
    Call,
    End,
    Mute,
    Speaker(bool),
    Where(GeoPoint),
    Type(String),
    Status,
    Help,
    Quit,
    Blank,
    Invalid(String),
}

pub const HELP: &str = "\
  <text>           caller speech (final result)
  ~<text>          caller speech (interim result)
  /call            start a call
  /end             end the call
  /mute            toggle the microphone
  /speaker on|off  toggle spoken responses
  /where LAT LNG   set the caller location
  /type <text>     typed caller input
  /status          show call status
  /quit            exit";

pub fn parse(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Blank;
    }
    if let Some(interim) = line.strip_prefix('~') {
        return ConsoleInput::Speech {
            text: interim.trim().to_string(),
            is_final: false,
        };
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleInput::Speech {
            text: line.to_string(),
            is_final: true,
        };
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name.to_ascii_lowercase().as_str() {
        "call" => ConsoleInput::Call,
        "end" => ConsoleInput::End,
        "mute" => ConsoleInput::Mute,
        "speaker" => match rest {
            "on" => ConsoleInput::Speaker(true),
            "off" => ConsoleInput::Speaker(false),
            _ => ConsoleInput::Invalid("usage: /speaker on|off".into()),
        },
        "where" => parse_location(rest)
            .map(ConsoleInput::Where)
            .unwrap_or_else(|| ConsoleInput::Invalid("usage: /where LAT LNG".into())),
        "type" if !rest.is_empty() => ConsoleInput::Type(rest.to_string()),
        "type" => ConsoleInput::Invalid("usage: /type <text>".into()),
        "status" => ConsoleInput::Status,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        other => ConsoleInput::Invalid(format!("unknown command /{}", other)),
    }
}

fn parse_location(rest: &str) -> Option<GeoPoint> {
    let mut parts = rest.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty());
    let lat: f64 = parts.next()?.parse().ok()?;
    let lng: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(GeoPoint::new(lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_interim_lines_are_speech() {
        assert_eq!(
            parse("my house is on fire"),
            ConsoleInput::Speech {
                text: "my house is on fire".into(),
                is_final: true
            }
        );
        assert_eq!(
            parse("~my house"),
            ConsoleInput::Speech {
                text: "my house".into(),
                is_final: false
            }
        );
        assert_eq!(parse("   "), ConsoleInput::Blank);
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse("/call"), ConsoleInput::Call);
        assert_eq!(parse("/Speaker off"), ConsoleInput::Speaker(false));
        assert_eq!(parse("/where 17.4, 78.5"), ConsoleInput::Where(GeoPoint::new(17.4, 78.5)));
        assert_eq!(parse("/type need help"), ConsoleInput::Type("need help".into()));
        assert!(matches!(parse("/where 200 0"), ConsoleInput::Invalid(_)));
        assert!(matches!(parse("/dance"), ConsoleInput::Invalid(_)));
    }
}
