//! Parsing of lines typed at the prompt

use relay_protocol::Position;

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Plain text, sent as a content edit
    Say(String),
    Who,
    Help,
    Clear,
    Quit,
    /// Position attached to subsequent edits
    MoveTo(Position),
    Unknown(String),
}

impl Input {
    /// `None` for blank lines
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Some(Input::Say(line.to_string()));
        };

        // "//text" sends "/text"
        if command.starts_with('/') {
            return Some(Input::Say(command.to_string()));
        }

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or("").to_lowercase();
        let input = match name.as_str() {
            "who" => Input::Who,
            "help" | "?" => Input::Help,
            "clear" => Input::Clear,
            "quit" | "exit" => Input::Quit,
            "at" => match (parse_coord(parts.next()), parse_coord(parts.next())) {
                (Some(x), Some(y)) => Input::MoveTo(Position { x, y }),
                _ => Input::Unknown(line.to_string()),
            },
            _ => Input::Unknown(line.to_string()),
        };
        Some(input)
    }
}

fn parse_coord(raw: Option<&str>) -> Option<f64> {
    raw?.parse::<f64>().ok().filter(|v| v.is_finite())
}
