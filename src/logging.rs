use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

/// Capacity of the log fan-out channel. Slow SSE clients lag and skip lines.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Writes every formatted log line to a broadcast channel, and to stdout
/// unless suppressed.
#[derive(Clone)]
pub(crate) struct LogBroadcastWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl LogBroadcastWriter {
    pub fn new(suppress_stdout: bool) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            sender,
            suppress_stdout,
        }
    }
}

impl<'a> MakeWriter<'a> for LogBroadcastWriter {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct LineWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        if !line.is_empty() {
            // No receivers is fine.
            let _ = self.sender.send(line);
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lines_reach_subscribers_trimmed() {
        let writer = LogBroadcastWriter::new(true);
        let mut rx = writer.sender.subscribe();
        let mut line = writer.make_writer();
        line.write_all(b"INFO relay: started\n").unwrap();
        line.write_all(b"\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO relay: started");
        assert!(rx.try_recv().is_err());
    }
}
