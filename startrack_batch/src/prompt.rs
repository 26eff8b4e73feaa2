//! Interactive parameter entry, one question per line.
//!
//! An empty answer keeps the default shown in brackets.

use std::io::{BufRead, Write};

use startrack_core::TrackingParameters;

use crate::config::ConfigError;

/// Asks for the six tracking parameters in dialog order.
pub fn prompt_parameters<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<TrackingParameters, ConfigError> {
    let defaults = TrackingParameters::default();
    let mut prompt = Prompt { input, output };

    writeln!(prompt.output, "Tracking settings").map_err(io_error)?;
    let linking_max_distance = prompt.number("Linking: max distance", defaults.linking_max_distance)?;
    let allow_gap_closing = prompt.flag("Gap closing", defaults.allow_gap_closing)?;
    let gap_closing_max_distance = prompt.number("Gap closing: max distance", defaults.gap_closing_max_distance)?;
    let max_frame_gap = prompt.number("Gap closing: max frame gap", defaults.max_frame_gap as f64)?;
    let allow_track_splitting = prompt.flag("Track splitting", defaults.allow_track_splitting)?;
    let splitting_max_distance = prompt.number("Track splitting: max distance", defaults.splitting_max_distance)?;

    let params = TrackingParameters {
        linking_max_distance,
        allow_gap_closing,
        gap_closing_max_distance,
        max_frame_gap: TrackingParameters::frame_gap_from_f64(max_frame_gap)?,
        allow_track_splitting,
        splitting_max_distance,
    };
    Ok(params.validated()?)
}

struct Prompt<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<R: BufRead, W: Write> Prompt<'_, R, W> {
    fn ask(&mut self, question: &str, default: &str) -> Result<String, ConfigError> {
        write!(self.output, "{} [{}]: ", question, default).map_err(io_error)?;
        self.output.flush().map_err(io_error)?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).map_err(io_error)?;
        if read == 0 {
            return Err(ConfigError::Prompt(format!("input closed at \"{}\"", question)));
        }
        Ok(line.trim().to_string())
    }

    fn number(&mut self, question: &str, default: f64) -> Result<f64, ConfigError> {
        let answer = self.ask(question, &format!("{:?}", default))?;
        if answer.is_empty() {
            return Ok(default);
        }
        answer
            .parse()
            .map_err(|_| ConfigError::Prompt(format!("{}: \"{}\" is not a number", question, answer)))
    }

    fn flag(&mut self, question: &str, default: bool) -> Result<bool, ConfigError> {
        let answer = self.ask(question, if default { "Y/n" } else { "y/N" })?;
        match answer.to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "y" | "yes" | "true" | "1" => Ok(true),
            "n" | "no" | "false" | "0" => Ok(false),
            _ => Err(ConfigError::Prompt(format!("{}: expected yes or no, got \"{}\"", question, answer))),
        }
    }
}

fn io_error(err: std::io::Error) -> ConfigError {
    ConfigError::Prompt(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(answers: &str) -> Result<TrackingParameters, ConfigError> {
        let mut input = Cursor::new(answers.as_bytes().to_vec());
        let mut output = Vec::new();
        prompt_parameters(&mut input, &mut output)
    }

    #[test]
    fn test_empty_answers_keep_defaults() {
        let params = run("\n\n\n\n\n\n").unwrap();
        assert_eq!(params, TrackingParameters::default());
    }

    #[test]
    fn test_answers_are_parsed() {
        let params = run("12.5\nn\n30\n3\nno\n8\n").unwrap();
        assert_eq!(params.linking_max_distance, 12.5);
        assert!(!params.allow_gap_closing);
        assert_eq!(params.gap_closing_max_distance, 30.0);
        assert_eq!(params.max_frame_gap, 3);
        assert!(!params.allow_track_splitting);
        assert_eq!(params.splitting_max_distance, 8.0);
    }

    #[test]
    fn test_fractional_frame_gap_rejected() {
        assert!(matches!(run("\n\n\n2.5\n\n\n"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_answers_rejected() {
        assert!(matches!(run("abc\n"), Err(ConfigError::Prompt(_))));
        assert!(matches!(run("\nmaybe\n"), Err(ConfigError::Prompt(_))));
        assert!(matches!(run("\n\n"), Err(ConfigError::Prompt(_))));
        assert!(matches!(run("-4\n\n\n\n\n\n"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_prompt_shows_defaults() {
        let mut input = Cursor::new(b"\n\n\n\n\n\n".to_vec());
        let mut output = Vec::new();
        prompt_parameters(&mut input, &mut output).unwrap();
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Linking: max distance [20.0]: "));
        assert!(shown.contains("Gap closing [Y/n]: "));
    }
}
