//! Output handling for supervised processes.
//!
//! Every managed process writes to a `LogSink` through a `ProcessLog` tagged with
//! its name, environment, color index and the run's name width. The console sink
//! renders each line with an aligned, optionally colored prefix.

use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use strip_ansi_escapes::strip;

/// ANSI foreground codes cycled through by color index.
pub const PALETTE: [u8; 6] = [
    32, // green
    36, // cyan
    35, // magenta
    33, // yellow
    34, // blue
    31, // red
];

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
    /// A lifecycle notice written by the supervisor itself.
    Notice,
}

/// Identifies the process a line belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTag {
    pub name: String,
    pub environment: String,
    pub color_index: usize,
    /// Length of the longest process name in the run, for alignment.
    pub width: usize,
}

/// Destination for process output and lifecycle notices.
pub trait LogSink: Send + Sync {
    fn write_line(&self, tag: &LogTag, stream: StreamKind, line: &str);
}

/// A sink bound to one process.
#[derive(Clone)]
pub struct ProcessLog {
    tag: LogTag,
    sink: Arc<dyn LogSink>,
}

impl ProcessLog {
    pub fn new(tag: LogTag, sink: Arc<dyn LogSink>) -> Self {
        Self { tag, sink }
    }

    pub fn line(&self, stream: StreamKind, line: &str) {
        self.sink.write_line(&self.tag, stream, line);
    }

    pub fn notice(&self, message: &str) {
        self.line(StreamKind::Notice, message);
    }
}

/// Writes prefixed lines to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    color: bool,
}

impl ConsoleSink {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn format_line(&self, tag: &LogTag, line: &str) -> String {
        let time = clock_time();
        let prefix = format!("{} {:<width$} |", time, tag.name, width = tag.width);
        let prefix = if self.color {
            apply_color(&prefix, tag.color_index)
        } else {
            prefix
        };
        let text = sanitize_text(line, !self.color);
        format!("{} {}", prefix, text)
    }
}

impl LogSink for ConsoleSink {
    fn write_line(&self, tag: &LogTag, _stream: StreamKind, line: &str) {
        let output = self.format_line(tag, line);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", output);
    }
}

/// Wraps `text` in the palette color for `color_index`.
pub fn apply_color(text: &str, color_index: usize) -> String {
    let code = PALETTE[color_index % PALETTE.len()];
    format!("\u{1b}[{}m{}\u{1b}[0m", code, text)
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

// Local wall clock as HH:MM:SS.
fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, color_index: usize) -> LogTag {
        LogTag {
            name: name.to_string(),
            environment: "dev".to_string(),
            color_index,
            width: 8,
        }
    }

    #[test]
    fn plain_prefix_is_padded_to_width() {
        let sink = ConsoleSink::new(false);
        let line = sink.format_line(&tag("api", 0), "hello");
        assert!(line.ends_with("api      | hello"), "{line}");
    }

    #[test]
    fn plain_output_strips_child_colors() {
        let sink = ConsoleSink::new(false);
        let line = sink.format_line(&tag("api", 0), "\u{1b}[31mred\u{1b}[0m");
        assert!(line.ends_with("| red"), "{line}");
    }

    #[test]
    fn prefix_starts_with_local_clock_time() {
        let sink = ConsoleSink::new(false);
        let line = sink.format_line(&tag("api", 0), "hello");
        let (time, _) = line.split_once(' ').unwrap();
        let fields: Vec<u32> = time.split(':').map(|f| f.parse().unwrap()).collect();
        assert_eq!(time.len(), 8, "{line}");
        assert_eq!(fields.len(), 3);
        assert!(fields[0] < 24 && fields[1] < 60 && fields[2] < 61);
    }

    #[test]
    fn color_cycles_through_palette() {
        assert_eq!(apply_color("x", 0), "\u{1b}[32mx\u{1b}[0m");
        assert_eq!(apply_color("x", 5), "\u{1b}[31mx\u{1b}[0m");
        assert_eq!(apply_color("x", 6), apply_color("x", 0));
    }

    #[test]
    fn process_log_forwards_tag() {
        let sink = Arc::new(testing::MemorySink::default());
        let log = ProcessLog::new(tag("api-dev", 1), sink.clone());
        log.notice("Terminating api-dev");
        log.line(StreamKind::Stdout, "ready");
        assert_eq!(sink.lines_for("api-dev"), vec!["Terminating api-dev", "ready"]);
        assert_eq!(sink.notices_for("api-dev"), vec!["Terminating api-dev"]);
    }
}
