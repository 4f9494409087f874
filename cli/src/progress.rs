use core::time::Duration;
use std::io::{self, Write};
use std::time::Instant;

use rand::seq::SliceRandom;

#[cfg(feature = "unicode")]
mod constants {
    pub static SUCCESS_MARKER: &'static str = "✔";
    pub static FAIL_MARKER: &'static str = "✘";
    pub static SPINNERS_CHOICES: &[&[&'static str]] = &[
        &["┤", "┘", "┴", "└", "├", "┌", "┬", "┐"],
        &["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"],
        &["◰", "◳", "◲", "◱"],
        &["◡", "⊙", "◠"],
    ];
}

#[cfg(not(feature = "unicode"))]
mod constants {
    pub static SUCCESS_MARKER: &'static str = "+";
    pub static FAIL_MARKER: &'static str = "!";
    pub static SPINNERS_CHOICES: &[&[&'static str]] = &[
        &["|", "/", "-", "\\"],
        &[".", "o", "O", "@", "O", "o", "."],
    ];
}

pub use constants::*;

pub fn get_spinner() -> &'static [&'static str] {
    let mut rng = rand::thread_rng();
    SPINNERS_CHOICES
        .choose(&mut rng)
        .copied()
        .unwrap_or(SPINNERS_CHOICES[0])
}

/// A sequence of strings cycled through to show progress
pub struct Spinner<'a> {
    sequence: &'a [&'a str],
    idx: usize,
}

impl<'a> Spinner<'a> {
    pub fn new(sequence: &'a [&'a str]) -> Self {
        Self { sequence, idx: 0 }
    }

    pub fn get_current(&self) -> &'a str {
        self.sequence[self.idx]
    }

    pub fn step(&mut self) {
        self.idx = (self.idx + 1) % self.sequence.len();
    }
}

/// A [Spinner] that only advances once per `rate`
pub struct TickSpinner<'a> {
    wrapped: Spinner<'a>,
    rate: Duration,
    last_tick: Instant,
}

impl<'a> TickSpinner<'a> {
    pub fn new(sequence: &'a [&'a str], rate: Duration) -> Self {
        Self {
            wrapped: Spinner::new(sequence),
            rate,
            last_tick: Instant::now(),
        }
    }

    /// Get the current spinner string, advancing only when a tick has
    /// occurred
    pub fn get(&mut self) -> &'a str {
        if self.last_tick.elapsed() >= self.rate {
            self.last_tick = Instant::now();
            self.wrapped.step();
        }
        self.wrapped.get_current()
    }
}

impl TickSpinner<'static> {
    pub fn new_rand(rate: Duration) -> Self {
        Self::new(get_spinner(), rate)
    }
}

/// One line status display on stderr: a spinner followed by a message that
/// is replaced as the task progresses
pub struct StatusLine {
    spinner: TickSpinner<'static>,
    message: String,
}

impl StatusLine {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            spinner: TickSpinner::new_rand(Duration::from_millis(150)),
            message: message.into(),
        }
    }

    pub fn set_message<S: Into<String>>(&mut self, message: S) {
        self.message = message.into();
    }

    pub fn tick(&mut self) {
        let spin = self.spinner.get();
        self.draw(spin);
    }

    /// Draw the final marker and move to the next line
    pub fn finish(&mut self, ok: bool) {
        self.draw(if ok { SUCCESS_MARKER } else { FAIL_MARKER });
        eprintln!();
    }

    fn draw(&self, marker: &str) {
        let mut err = io::stderr().lock();
        // \x1b[2K clears whatever was on the line before
        let _ = write!(err, "\r\x1b[2K{} {}", marker, self.message);
        let _ = err.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tick_spinner() {
        let spinner_items = SPINNERS_CHOICES[0];
        let mut ticker = TickSpinner::new(spinner_items, Duration::from_millis(50));

        // Shouldn't advance
        let first = ticker.get();
        let second = ticker.get();
        assert_eq!(first, second);

        std::thread::sleep(Duration::from_millis(60));

        // Should advance
        let second = ticker.get();
        assert_ne!(first, second);
    }

    #[test]
    fn test_spinner_wraps() {
        let spinner_items = SPINNERS_CHOICES[0];
        let mut spinner = Spinner::new(spinner_items);
        let first = spinner.get_current();
        for _ in 0..spinner_items.len() {
            spinner.step();
        }
        assert_eq!(first, spinner.get_current());
    }
}
