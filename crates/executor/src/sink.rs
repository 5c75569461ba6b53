use std::io::Write;

use tokio::sync::mpsc;

/// Destination for backend output.
///
/// Backends accept an optional sink; when none is given output goes to the
/// process's standard output.
#[derive(Debug, Clone, Default)]
pub enum OutputSink {
    #[default]
    Stdout,
    Channel(mpsc::UnboundedSender<String>),
}

impl OutputSink {
    /// A channel-backed sink plus the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (OutputSink::Channel(tx), rx)
    }

    pub fn or_stdout(sink: Option<OutputSink>) -> Self {
        sink.unwrap_or_default()
    }

    /// Emit a chunk of output as-is.
    pub fn write(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        match self {
            OutputSink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(chunk.as_bytes());
                let _ = out.flush();
            }
            OutputSink::Channel(tx) => {
                let _ = tx.send(chunk);
            }
        }
    }

    /// Emit a single line, appending the newline.
    pub fn line(&self, line: impl AsRef<str>) {
        self.write(format!("{}\n", line.as_ref()));
    }
}
