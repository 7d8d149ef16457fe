use crate::joystick::event::{RawEvent, Record, RECORD_SIZE};
use chrono::Local;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Back-off after an empty read so an exhausted stream does not spin
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Device read failed after {records} records: {source}")]
    Read {
        records: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Reader task failed: {0}")]
    Task(String),
}

/// What the reader did before it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSummary {
    pub records: u64,
}

/// Blocking producer side of the pipeline
///
/// Reads one record at a time from `source` and forwards it into the bounded
/// queue. A full queue stalls the reader; nothing is dropped. Owns the device
/// handle and closes it when the loop ends.
pub struct DeviceReader<R> {
    source: R,
    queue: mpsc::Sender<Record>,
    cancel: CancellationToken,
}

impl<R: Read> DeviceReader<R> {
    pub fn new(source: R, queue: mpsc::Sender<Record>, cancel: CancellationToken) -> Self {
        Self {
            source,
            queue,
            cancel,
        }
    }

    /// Run until cancelled, the queue closes, or the device fails
    ///
    /// Must not be called from inside an async context; use [`Self::spawn`].
    pub fn run(mut self) -> Result<ReaderSummary, ReaderError> {
        info!("Starting device reader loop");

        let mut records: u64 = 0;
        let mut window_records: u64 = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !self.cancel.is_cancelled() {
            let mut record = [0u8; RECORD_SIZE];
            match self.source.read(&mut record) {
                Ok(RECORD_SIZE) => {
                    debug!("Read event: {}", RawEvent::decode(&record));
                    if self.queue.blocking_send(record).is_err() {
                        warn!("Event queue closed, stopping device reader");
                        break;
                    }
                    records += 1;
                    window_records += 1;
                }
                Ok(0) => {
                    std::thread::sleep(IDLE_BACKOFF);
                }
                Ok(n) => {
                    debug!("Short read of {} bytes, skipping", n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    debug!("Device read interrupted, retrying");
                }
                Err(e) => {
                    error!("Device read failed after {} records: {}", records, e);
                    return Err(ReaderError::Read { records, source: e });
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Device reader stats: forwarded {} events in last {} seconds",
                    window_records,
                    log_interval.num_seconds()
                );
                window_records = 0;
                last_log_time = now;
            }
        }

        info!("Device reader stopped after {} records", records);
        Ok(ReaderSummary { records })
    }
}

impl<R: Read + Send + 'static> DeviceReader<R> {
    /// Move the reader onto a blocking thread
    pub fn spawn(self) -> JoinHandle<Result<ReaderSummary, ReaderError>> {
        debug!("Spawning device reader on blocking thread");
        tokio::task::spawn_blocking(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joystick::event::{KIND_AXIS, KIND_BUTTON};
    use std::io::Cursor;

    fn record(kind: u8, index: u8, value: i16) -> Record {
        RawEvent {
            timestamp: 0,
            value,
            kind,
            index,
        }
        .encode()
    }

    /// Yields the given records one per read, then fails
    struct FailingSource {
        records: Vec<Record>,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.records.is_empty() {
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"));
            }
            let record = self.records.remove(0);
            buf[..RECORD_SIZE].copy_from_slice(&record);
            Ok(RECORD_SIZE)
        }
    }

    #[test]
    fn forwards_records_until_read_error() {
        let (tx, mut rx) = mpsc::channel(10);
        let source = FailingSource {
            records: vec![
                record(KIND_BUTTON, 1, 1),
                record(KIND_AXIS, 0, -32767),
                record(KIND_BUTTON, 1, 0),
            ],
        };

        let result = DeviceReader::new(source, tx, CancellationToken::new()).run();
        match result {
            Err(ReaderError::Read { records, .. }) => assert_eq!(records, 3),
            other => panic!("expected read error, got {:?}", other),
        }

        let mut received = Vec::new();
        while let Ok(rec) = rx.try_recv() {
            received.push(RawEvent::decode(&rec));
        }
        assert_eq!(received.len(), 3);
        assert_eq!(received[1].value, -32767);
        // reader dropped its sender on exit
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stops_immediately_when_already_cancelled() {
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let source = Cursor::new(record(KIND_BUTTON, 0, 1).to_vec());
        let summary = DeviceReader::new(source, tx, cancel).run().unwrap();
        assert_eq!(summary.records, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn skips_short_reads() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut bytes = record(KIND_BUTTON, 2, 1).to_vec();
        bytes.extend_from_slice(&[0xAA; 3]);
        let source = Cursor::new(bytes);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let handle = std::thread::spawn(move || DeviceReader::new(source, tx, cancel).run());

        let first = loop {
            if let Ok(rec) = rx.try_recv() {
                break rec;
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        stopper.cancel();
        let summary = handle.join().unwrap().unwrap();

        assert_eq!(RawEvent::decode(&first).index, 2);
        assert_eq!(summary.records, 1);
    }

    #[test]
    fn stops_when_queue_closes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let source = Cursor::new(record(KIND_BUTTON, 0, 1).to_vec());
        let summary = DeviceReader::new(source, tx, CancellationToken::new())
            .run()
            .unwrap();
        assert_eq!(summary.records, 0);
    }
}
