use std::fmt::Display;
use std::io::{self, BufRead, Write};

use colored::Colorize;

/// Line-oriented terminal I/O. Generic so sessions can be driven by a script.
pub struct Console<R, W> {
    input: R,
    output: W,
}

/// Answer to a vocabulary question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer<T> {
    Value(T),
    /// Enter without input; the field stays empty.
    Blank,
    Skip,
    Quit,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }

    /// `None` on end of input.
    pub fn prompt_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut line = String::new();
        match self.input.read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line.trim().to_owned())),
        }
    }

    pub fn say(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.output, "{text}")
    }

    pub fn warn(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{}", text.yellow())
    }

    /// Asks for one of `options` by number or by name. `s` skips the item,
    /// `q` (or end of input) quits.
    pub fn choose<T: Copy + Display>(
        &mut self,
        title: &str,
        options: &[T],
        parse: fn(&str) -> Option<T>,
    ) -> io::Result<Answer<T>> {
        let listing: Vec<String> = options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}) {option}", i + 1))
            .collect();
        self.say(format!("  {}", listing.join("  ").dimmed()))?;

        loop {
            let prompt = format!(
                "{title} [1-{}, Enter=none, s=skip, q=quit]: ",
                options.len()
            );
            let Some(input) = self.prompt_line(&prompt)? else {
                return Ok(Answer::Quit);
            };
            match input.to_ascii_lowercase().as_str() {
                "" => return Ok(Answer::Blank),
                "s" => return Ok(Answer::Skip),
                "q" => return Ok(Answer::Quit),
                other => {
                    let picked = other
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| options.get(i).copied())
                        .or_else(|| parse(other));
                    match picked {
                        Some(value) => return Ok(Answer::Value(value)),
                        None => self.warn(&format!("'{input}' is not a valid {title}."))?,
                    }
                }
            }
        }
    }

    /// Free text; empty input and end of input both yield `None`.
    pub fn optional_text(&mut self, prompt: &str) -> io::Result<Option<String>> {
        Ok(self.prompt_line(prompt)?.filter(|text| !text.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use dc_core::core::Sentiment;

    use super::*;

    fn console(script: &str) -> Console<&[u8], Vec<u8>> {
        Console::new(script.as_bytes(), Vec::new())
    }

    #[test]
    fn test_choose_by_number_and_name() {
        let mut c = console("2\nvery_negative\n");
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Value(Sentiment::Negative)
        );
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Value(Sentiment::VeryNegative)
        );
    }

    #[test]
    fn test_choose_retries_invalid_input() {
        let mut c = console("9\nangry\n\n");
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Blank
        );
        let out = String::from_utf8(c.output).unwrap();
        assert!(out.contains("'9' is not a valid sentiment."));
        assert!(out.contains("'angry' is not a valid sentiment."));
    }

    #[test]
    fn test_choose_skip_quit_and_eof() {
        let mut c = console("s\nQ\n");
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Skip
        );
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Quit
        );
        assert_eq!(
            c.choose("sentiment", Sentiment::ALL, Sentiment::parse).unwrap(),
            Answer::Quit
        );
    }
}
