//! Cargo-style status output on stderr.

use std::{fmt::Display, io::Write};

use anyhow::bail;
use is_terminal::IsTerminal as _;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Verbosity {
    /// Log filter matching this verbosity, used when `RUST_LOG` is unset.
    pub fn log_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::VeryVerbose => "trace",
        }
    }
}

pub struct Shell {
    err: StandardStream,
    verbosity: Verbosity,
    color_choice: ColorChoice,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("verbosity", &self.verbosity)
            .field("color_choice", &self.color_choice)
            .finish()
    }
}

fn auto_color() -> ColorChoice {
    if std::io::stderr().is_terminal() {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        let color_choice = auto_color();
        Self {
            err: StandardStream::stderr(color_choice),
            verbosity: Verbosity::Normal,
            color_choice,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Accepts cargo's `--color` values.
    pub fn set_color_choice(&mut self, color: Option<&str>) -> anyhow::Result<()> {
        let choice = match color {
            Some("always") => ColorChoice::Always,
            Some("never") => ColorChoice::Never,
            Some("auto") | None => auto_color(),
            Some(other) => {
                bail!("argument for --color must be auto, always, or never, but found `{other}`")
            }
        };
        self.color_choice = choice;
        self.err = StandardStream::stderr(choice);
        Ok(())
    }

    /// Runs `f` only at verbose levels.
    pub fn verbose<F>(&mut self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Shell) -> anyhow::Result<()>,
    {
        if self.verbosity >= Verbosity::Verbose {
            f(self)?;
        }
        Ok(())
    }

    fn print(
        &mut self,
        header: &dyn Display,
        message: &dyn Display,
        color: Color,
        justified: bool,
    ) -> anyhow::Result<()> {
        self.err.set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))?;
        if justified {
            write!(self.err, "{header:>12}")?;
        } else {
            write!(self.err, "{header}")?;
            self.err.set_color(ColorSpec::new().set_bold(true))?;
            write!(self.err, ":")?;
        }
        self.err.reset()?;
        writeln!(self.err, " {message}")?;
        Ok(())
    }

    pub fn status_with_color(
        &mut self,
        header: impl Display,
        message: impl Display,
        color: Color,
    ) -> anyhow::Result<()> {
        if self.verbosity == Verbosity::Quiet {
            return Ok(());
        }
        self.print(&header, &message, color, true)
    }

    pub fn status(&mut self, header: impl Display, message: impl Display) -> anyhow::Result<()> {
        self.status_with_color(header, message, Color::Green)
    }

    pub fn error(&mut self, message: impl Display) -> anyhow::Result<()> {
        self.print(&"error", &message, Color::Red, false)
    }

    pub fn warn(&mut self, message: impl Display) -> anyhow::Result<()> {
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            _ => self.print(&"warning", &message, Color::Yellow, false),
        }
    }

    pub fn note(&mut self, message: impl Display) -> anyhow::Result<()> {
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            _ => self.print(&"note", &message, Color::Cyan, false),
        }
    }
}
