//! Pipeline Handle - wires the device reader to the drive loop
//!
//! ```text
//! DeviceReader ─[Record]→ DriveLoop ─[DriveCommand]→ VehicleGateway
//!  (blocking)   (mpsc::channel(capacity))
//! ```
//!
//! Both halves share one [`CancellationToken`]. The drive task raises it when
//! it ends, whatever the reason, so the reader never outlives the consumer.

use crate::config::DriveConfig;
use crate::drive::drive_loop::Connecting;
use crate::drive::{DriveError, DriveLoop, DriveSettings, DriveStats};
use crate::gateway::{GatewayTarget, VehicleGateway};
use crate::joystick::{DeviceInfo, DeviceReader, ReaderError, ReaderSummary};
use std::io::Read;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub target: GatewayTarget,
    pub drive: DriveSettings,
}

impl From<&DriveConfig> for PipelineSettings {
    fn from(config: &DriveConfig) -> Self {
        Self {
            queue_capacity: config.device.queue_capacity,
            target: config.gateway_target(),
            drive: config.drive_settings(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Drive loop failed; carries what the reader did in the meantime
    #[error("Drive loop error: {source}")]
    Drive {
        #[source]
        source: DriveError,
        reader: Result<ReaderSummary, ReaderError>,
    },
}

/// Outcome of a finished pipeline
///
/// The reader result is informational: a failed device read stops the
/// reader but never the drive loop.
#[derive(Debug)]
pub struct PipelineReport {
    pub drive: DriveStats,
    pub reader: Result<ReaderSummary, ReaderError>,
}

pub struct PipelineHandle {
    reader: JoinHandle<Result<ReaderSummary, ReaderError>>,
    drive: JoinHandle<Result<DriveStats, DriveError>>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    /// Spawn the reader on a blocking thread and the drive loop on a task
    pub fn spawn<R>(
        source: R,
        gateway: Box<dyn VehicleGateway>,
        device: DeviceInfo,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        info!("Initializing pipeline with settings: {:?}", settings);

        let (sender, receiver) = mpsc::channel(settings.queue_capacity);
        debug!(
            "Created event queue with capacity {}",
            settings.queue_capacity
        );

        info!("Spawning device reader");
        let reader = DeviceReader::new(source, sender, cancel.clone()).spawn();

        info!("Spawning drive loop");
        let drive_loop = DriveLoop::create(
            gateway,
            settings.target,
            settings.drive,
            device.axes,
            device.buttons,
            receiver,
            cancel.clone(),
        );
        let token = cancel.clone();
        let drive = tokio::spawn(async move {
            let result = run_drive_loop(drive_loop).await;
            if let Err(e) = &result {
                error!("Drive loop terminated: {}", e);
            }
            token.cancel();
            result
        });

        Self {
            reader,
            drive,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for both halves to finish
    ///
    /// The drive loop is awaited in full. The reader gets `reader_grace` to
    /// notice the cancellation; one blocked inside a device read only returns
    /// after its next record and is left behind. The reader outcome is
    /// reported whether or not the drive loop succeeded.
    pub async fn join(self, reader_grace: Duration) -> Result<PipelineReport, PipelineError> {
        let drive = match self.drive.await {
            Ok(result) => result,
            Err(e) => Err(DriveError::Task(e.to_string())),
        };

        let reader = match tokio::time::timeout(reader_grace, self.reader).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ReaderError::Task(e.to_string())),
            Err(_) => Err(ReaderError::Task(format!(
                "still blocked in a device read after {:?}",
                reader_grace
            ))),
        };
        match &reader {
            Ok(summary) => debug!("Device reader stopped after {} records", summary.records),
            Err(e) => warn!("Device reader ended with error: {}", e),
        }

        match drive {
            Ok(drive) => {
                info!("Pipeline stopped: {:?}", drive);
                Ok(PipelineReport { drive, reader })
            }
            Err(source) => Err(PipelineError::Drive { source, reader }),
        }
    }
}

async fn run_drive_loop(drive_loop: DriveLoop<Connecting>) -> Result<DriveStats, DriveError> {
    let driving = drive_loop.connect().await?;
    let stopped = driving.run_until_cancelled().await;
    Ok(stopped.shutdown().await)
}
