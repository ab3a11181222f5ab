//! Per-instance coloured output for concurrently running subprocesses.
//!
//! Every launch takes a [`ColorSlot`] from the shared [`Palette`]. The
//! [`OutputMultiplexer`] prefixes each line a process writes with the
//! instance label in that slot's colour; stderr lines are dimmed. Writes
//! are line-atomic, so lines from different processes interleave in arrival
//! order but are never torn.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use console::{Color, Style};

use crate::error::VagabondError;
use crate::process::{OutputChunk, OutputStream, ProcessHandle};

const PALETTE: [Color; 5] = [
    Color::Cyan,
    Color::Green,
    Color::Magenta,
    Color::Yellow,
    Color::Blue,
];

/// Index into the fixed colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSlot(usize);

impl ColorSlot {
    pub fn color(self) -> Color {
        PALETTE[self.0]
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Hands out colour slots round-robin over the life of the process.
///
/// Shared by every component that launches a subprocess, so adjacent
/// launches get different colours without the call sites coordinating.
#[derive(Debug, Default)]
pub struct Palette {
    launches: AtomicUsize,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_slot(&self) -> ColorSlot {
        ColorSlot(self.launches.fetch_add(1, Ordering::Relaxed) % PALETTE.len())
    }
}

type Sink = Box<dyn Write + Send>;

/// Writes labelled subprocess output to a shared sink (stdout by default).
pub struct OutputMultiplexer {
    sink: Mutex<Sink>,
    colored: bool,
}

impl OutputMultiplexer {
    pub fn stdout(colored: bool) -> Self {
        Self::new(Box::new(std::io::stdout()), colored)
    }

    pub fn new(sink: Sink, colored: bool) -> Self {
        Self {
            sink: Mutex::new(sink),
            colored,
        }
    }

    /// Print every line `handle` produces under `label`, then resolve with
    /// the process outcome.
    pub async fn attach(
        &self,
        mut handle: ProcessHandle,
        label: &str,
        slot: ColorSlot,
    ) -> Result<(), VagabondError> {
        tracing::debug!(command = handle.command(), label, slot = slot.index(), "attached");
        while let Some(chunk) = handle.next_chunk().await {
            self.write_chunk(label, slot, &chunk)?;
        }
        handle.wait().await
    }

    /// Write one chunk, one prefixed line per line it contains. Blank lines
    /// keep their prefix, and a single trailing newline does not add one.
    pub fn write_chunk(
        &self,
        label: &str,
        slot: ColorSlot,
        chunk: &OutputChunk,
    ) -> Result<(), VagabondError> {
        let text = chunk.line.strip_suffix('\n').unwrap_or(&chunk.line);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let rendered = self.render(label, slot, chunk.stream, line);

            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            writeln!(sink, "{rendered}")
                .and_then(|()| sink.flush())
                .map_err(|e| VagabondError::Io {
                    context: "writing process output".into(),
                    source: e,
                })?;
        }
        Ok(())
    }

    fn render(&self, label: &str, slot: ColorSlot, stream: OutputStream, line: &str) -> String {
        if !self.colored {
            return format!("{label}: {line}");
        }

        let label_style = Style::new().fg(slot.color()).bold().force_styling(true);
        let line_style = match stream {
            OutputStream::Normal => Style::new().force_styling(true),
            OutputStream::Diagnostic => Style::new().fg(slot.color()).dim().force_styling(true),
        };
        format!(
            "{}{} {}",
            label_style.apply_to(label),
            label_style.apply_to(":"),
            line_style.apply_to(line)
        )
    }
}

/// A clonable in-memory sink, handy for capturing multiplexed output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
