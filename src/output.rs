use std::cell::Cell;
use std::io::{self, Write};

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;

use crate::orchestrator::{BuildReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &BuildReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Single overwritten status line on stderr:
/// `| % DONE | # TO DO | CURRENT SPECIES`.
#[derive(Default)]
pub struct TerminalProgress {
    started: Cell<bool>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn draw(&self, event: &ProgressEvent) -> io::Result<()> {
        let mut stderr = io::stderr();
        if !self.started.replace(true) {
            writeln!(stderr, "| % DONE | # TO DO | CURRENT SPECIES")?;
        }
        stderr
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::UntilNewLine))?;
        write!(
            stderr,
            "| {:>5}% | {:>7} | {}",
            event.percent(),
            event.remaining(),
            event.species
        )?;
        stderr.flush()
    }
}

impl ProgressSink for TerminalProgress {
    fn event(&self, event: ProgressEvent) {
        let _ = self.draw(&event);
    }

    fn finish(&self) {
        if self.started.get() {
            let _ = writeln!(io::stderr());
        }
    }
}
