use std::io::Write;
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Lines buffered for slow `/api/logs` subscribers before they start lagging.
pub const LOG_CHANNEL_CAPACITY: usize = 512;

/// Tees every formatted log line into a broadcast channel. Terminal output
/// goes to stderr so stdout stays clean for command results.
#[derive(Clone)]
pub struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stderr: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stderr: self.suppress_stderr,
        }
    }
}

pub struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stderr: bool,
}

impl Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        if !self.suppress_stderr {
            std::io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stderr {
            std::io::stderr().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber and return the sender feeding `/api/logs`.
pub fn init_tracing(level: Level, quiet: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    let make_writer = SseMakeWriter {
        sender: log_tx.clone(),
        suppress_stderr: quiet,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_broadcasts_each_line() {
        let (tx, mut rx) = broadcast::channel(8);
        let make_writer = SseMakeWriter {
            sender: tx,
            suppress_stderr: true,
        };
        let mut writer = make_writer.make_writer();
        writer.write_all(b"INFO querybrain: hello\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO querybrain: hello\n");
    }

    #[test]
    fn writer_without_subscribers_still_succeeds() {
        let (tx, _) = broadcast::channel(8);
        let mut writer = SseMakeWriter {
            sender: tx,
            suppress_stderr: true,
        }
        .make_writer();
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
    }
}
