//! Line input for the terminal front end

use std::io::BufRead;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

/// Reads lines on a detached thread and forwards them to a channel
///
/// A blocked read cannot be cancelled, so the thread is never joined: it
/// exits at end of input, when the receiver is dropped and another line
/// arrives, or with the process. The runtime never waits on it.
pub fn spawn_line_reader<R>(reader: R) -> UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Input read failed");
                    break;
                }
            };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("Input reader finished");
    });
    rx
}

/// Lines typed at the terminal
pub fn stdin_lines() -> UnboundedReceiver<String> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    /// Blocks in `read` until the gate's sender is dropped
    struct StuckReader {
        gate: std_mpsc::Receiver<()>,
    }

    impl Read for StuckReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.gate.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_lines_forwarded_until_eof() {
        let mut rx = spawn_line_reader(Cursor::new("hello\n/quit\n"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("hello"));
        assert_eq!(rx.blocking_recv().as_deref(), Some("/quit"));
        assert_eq!(rx.blocking_recv(), None);
    }

    #[test]
    fn test_blocked_reader_does_not_stall_runtime_shutdown() {
        let (gate_tx, gate) = std_mpsc::channel();
        let rt = tokio::runtime::Runtime::new().expect("runtime");

        let waited = rt.block_on(async {
            let mut rx = spawn_line_reader(BufReader::new(StuckReader { gate }));
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        });
        assert!(waited.is_err());

        let started = Instant::now();
        drop(rt);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(gate_tx);
    }
}
