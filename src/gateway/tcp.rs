use super::{GatewayError, GatewayTarget, VehicleGateway};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Gateway client for the node gateway process
///
/// Commands are newline-terminated, `;`-separated text lines:
///
/// ```text
/// CONNECT;<vehicle>
/// SPEED;<vehicle>;<speed>;<acceleration>
/// LANE;<vehicle>;<speed>;<acceleration>;<offset>
/// DISCONNECT;<vehicle>
/// ```
pub struct TcpGateway {
    stream: Option<TcpStream>,
    vehicle_id: String,
    io_timeout: Duration,
}

impl Default for TcpGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpGateway {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_IO_TIMEOUT)
    }

    pub fn with_timeout(io_timeout: Duration) -> Self {
        Self {
            stream: None,
            vehicle_id: String::new(),
            io_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send_line(&mut self, line: String) -> Result<(), GatewayError> {
        let io_timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(GatewayError::NotConnected)?;
        debug!("Gateway <- {}", line);

        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        let err = match tokio::time::timeout(io_timeout, stream.write_all(&bytes)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => GatewayError::Send(e),
            Err(_) => GatewayError::Timeout(io_timeout),
        };

        // part of the line may be on the wire, so the stream is no longer usable
        warn!("Dropping gateway connection after failed write: {}", err);
        self.stream = None;
        Err(err)
    }
}

#[async_trait]
impl VehicleGateway for TcpGateway {
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), GatewayError> {
        let address = target.address();
        info!("Connecting to gateway at {} for vehicle {}", address, target.vehicle_id);

        let stream = tokio::time::timeout(
            self.io_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.io_timeout))?
        .map_err(|source| GatewayError::Connect {
            address: address.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.vehicle_id = target.vehicle_id.clone();
        let line = format!("CONNECT;{}", self.vehicle_id);
        self.send_line(line).await?;

        info!("Connected to gateway at {}", address);
        Ok(())
    }

    async fn set_speed(&mut self, speed: i32, acceleration: i32) -> Result<(), GatewayError> {
        let line = format!("SPEED;{};{};{}", self.vehicle_id, speed, acceleration);
        self.send_line(line).await
    }

    async fn change_lane(
        &mut self,
        speed: i32,
        acceleration: i32,
        offset: i32,
    ) -> Result<(), GatewayError> {
        let line = format!(
            "LANE;{};{};{};{}",
            self.vehicle_id, speed, acceleration, offset
        );
        self.send_line(line).await
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        if self.stream.is_none() {
            debug!("Gateway already disconnected");
            return Ok(());
        }

        let line = format!("DISCONNECT;{}", self.vehicle_id);
        let sent = self.send_line(line).await;

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Failed to shut down gateway connection: {}", e);
            }
        }
        info!("Disconnected from gateway");
        sent
    }
}
