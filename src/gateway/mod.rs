//! Vehicle gateway adapters
//!
//! The drive loop never talks to the vehicle directly. It hands speed and
//! lane commands to a [`VehicleGateway`], which forwards them to the gateway
//! process that owns the radio link to the car.
//!
//! - [`tcp::TcpGateway`] speaks the line protocol of the node gateway.
//! - [`recording::RecordingGateway`] keeps the calls in memory and logs them;
//!   used for dry runs and in tests.

pub mod recording;
pub mod tcp;

pub use recording::{GatewayCall, RecordingGateway};
pub use tcp::TcpGateway;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to connect to gateway at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gateway is not connected")]
    NotConnected,

    #[error("Failed to send command: {0}")]
    Send(#[from] std::io::Error),

    #[error("Gateway did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Gateway rejected command: {0}")]
    Rejected(String),
}

/// Where the vehicle can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    pub host: String,
    pub port: u16,
    pub vehicle_id: String,
}

impl GatewayTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Actuator side of the pipeline
///
/// Calls are made from the drive loop only, one at a time, so command order
/// to the vehicle follows the order the loop produces them.
#[async_trait]
pub trait VehicleGateway: Send {
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), GatewayError>;

    async fn set_speed(&mut self, speed: i32, acceleration: i32) -> Result<(), GatewayError>;

    async fn change_lane(
        &mut self,
        speed: i32,
        acceleration: i32,
        offset: i32,
    ) -> Result<(), GatewayError>;

    /// Safe to call when already disconnected
    async fn disconnect(&mut self) -> Result<(), GatewayError>;
}
