use super::{GatewayError, GatewayTarget, VehicleGateway};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// One call received by a [`RecordingGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Connect(GatewayTarget),
    SetSpeed {
        speed: i32,
        acceleration: i32,
    },
    ChangeLane {
        speed: i32,
        acceleration: i32,
        offset: i32,
    },
    Disconnect,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<GatewayCall>,
    connected: bool,
    fail_commands: bool,
    fail_connect: bool,
}

/// In-memory gateway that logs every command instead of driving a car
///
/// Clones share the same call log, so a test can keep one handle while the
/// drive loop owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingGateway {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicked holder cannot leave the log half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Make speed and lane commands fail until switched off again
    pub fn set_failing(&self, failing: bool) {
        self.lock().fail_commands = failing;
    }

    pub fn set_connect_failing(&self, failing: bool) {
        self.lock().fail_connect = failing;
    }

    fn record_command(&self, call: GatewayCall) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(GatewayError::NotConnected);
        }
        info!("Dry run command: {:?}", call);
        inner.calls.push(call);
        if inner.fail_commands {
            return Err(GatewayError::Rejected("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VehicleGateway for RecordingGateway {
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.calls.push(GatewayCall::Connect(target.clone()));
        if inner.fail_connect {
            return Err(GatewayError::Connect {
                address: target.address(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        info!("Dry run connected to vehicle {}", target.vehicle_id);
        inner.connected = true;
        Ok(())
    }

    async fn set_speed(&mut self, speed: i32, acceleration: i32) -> Result<(), GatewayError> {
        self.record_command(GatewayCall::SetSpeed {
            speed,
            acceleration,
        })
    }

    async fn change_lane(
        &mut self,
        speed: i32,
        acceleration: i32,
        offset: i32,
    ) -> Result<(), GatewayError> {
        self.record_command(GatewayCall::ChangeLane {
            speed,
            acceleration,
            offset,
        })
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        if inner.connected {
            inner.calls.push(GatewayCall::Disconnect);
            inner.connected = false;
        }
        Ok(())
    }
}
