//! Consumer side of the pipeline
//!
//! The drive loop owns the [`ControlState`] and the gateway. It is a statum
//! state machine with three phases:
//!
//! ```text
//! Connecting ──► Driving ──► Stopped
//!   connect      queue + ticks   disconnect
//! ```
//!
//! While driving, one `select!` waits on the cancellation token, the tick
//! interval and the queue. Ticks are checked before the queue so a backlog of
//! events never starves integration, and every tick also takes at most one
//! queued record so a stalled gateway never starves the queue.

use crate::drive::state::{ControlState, DriveCommand, DriveLimits, Transition};
use crate::drive::DriveError;
use crate::gateway::{GatewayError, GatewayTarget, VehicleGateway};
use crate::joystick::event::{RawEvent, Record};
use crate::joystick::names::{AxisMap, ButtonMap};
use chrono::Local;
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timing and limits for the drive loop
#[derive(Clone, Debug)]
pub struct DriveSettings {
    pub limits: DriveLimits,
    pub initial_speed: f64,
    pub tick_interval: Duration,
    /// Wait after connecting before the first command
    pub startup_grace: Duration,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            limits: DriveLimits::default(),
            initial_speed: 400.0,
            tick_interval: Duration::from_millis(200),
            startup_grace: Duration::from_secs(1),
        }
    }
}

/// Counters reported when the loop stops
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriveStats {
    pub events: u64,
    pub discarded: u64,
    pub ticks: u64,
    pub commands: u64,
    pub failed_commands: u64,
    pub exit_requested: bool,
}

#[state]
#[derive(Debug, Clone)]
pub enum DrivePhase {
    Connecting,
    Driving,
    Stopped,
}

#[machine]
pub struct DriveLoop<S: DrivePhase> {
    gateway: Box<dyn VehicleGateway>,
    target: GatewayTarget,
    settings: DriveSettings,
    axes: AxisMap,
    buttons: ButtonMap,
    queue: mpsc::Receiver<Record>,
    cancel: CancellationToken,
    control: ControlState,
    stats: DriveStats,
}

impl<S: DrivePhase> DriveLoop<S> {
    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn stats(&self) -> &DriveStats {
        &self.stats
    }

    pub fn settings(&self) -> &DriveSettings {
        &self.settings
    }

    async fn send(&mut self, command: DriveCommand) -> Result<(), GatewayError> {
        send_command(self.gateway.as_mut(), command, &mut self.stats).await
    }
}

impl DriveLoop<Connecting> {
    pub fn create(
        gateway: Box<dyn VehicleGateway>,
        target: GatewayTarget,
        settings: DriveSettings,
        axes: AxisMap,
        buttons: ButtonMap,
        queue: mpsc::Receiver<Record>,
        cancel: CancellationToken,
    ) -> Self {
        info!("Creating drive loop with settings: {:?}", settings);
        let control = ControlState::new(settings.initial_speed);

        Self::new(
            gateway,
            target,
            settings,
            axes,
            buttons,
            queue,
            cancel,
            control,
            DriveStats::default(),
        )
    }

    /// Connect, wait out the startup grace period and send the initial speed
    pub async fn connect(mut self) -> Result<DriveLoop<Driving>, DriveError> {
        self.gateway
            .connect(&self.target)
            .await
            .map_err(DriveError::Connect)?;

        if !self.settings.startup_grace.is_zero() {
            debug!(
                "Waiting {:?} for the gateway to become ready",
                self.settings.startup_grace
            );
            tokio::select! {
                _ = tokio::time::sleep(self.settings.startup_grace) => {}
                _ = self.cancel.cancelled() => {
                    info!("Cancelled during startup grace period");
                }
            }
        }

        let initial = DriveCommand::SetSpeed {
            speed: self.control.current_speed as i32,
            acceleration: self.settings.limits.acceleration,
        };
        if let Err(e) = self.send(initial).await {
            warn!("Failed to send initial speed: {}", e);
        }

        info!("Drive loop connected, transitioning to Driving state");
        Ok(self.transition())
    }
}

impl DriveLoop<Driving> {
    /// Decode one queued record and apply it to the control state
    ///
    /// Malformed records are logged and discarded.
    pub fn handle_record(&mut self, record: &[u8]) -> Transition {
        let event = match RawEvent::try_from(record) {
            Ok(event) => event,
            Err(e) => {
                warn!("Discarding record: {}", e);
                self.stats.discarded += 1;
                return Transition::Continue;
            }
        };

        self.stats.events += 1;
        if event.is_initial() {
            debug!("Initial state event: {}", event);
        } else {
            debug!("Event: {}", event);
        }

        self.control.apply(&event, &self.axes, &self.buttons)
    }

    /// Run one integration step and send the resulting commands
    pub async fn tick(&mut self) -> Result<(), DriveError> {
        self.stats.ticks += 1;
        let commands = self.control.integrate(&self.settings.limits);
        debug!(
            "Tick {}: speed={:.1} lane={:.1} commands={}",
            self.stats.ticks,
            self.control.current_speed,
            self.control.current_lane,
            commands.len()
        );

        let total = commands.len();
        let mut failed = 0;
        for command in commands {
            if let Err(e) = self.send(command).await {
                warn!("Command {:?} failed: {}", command, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DriveError::Commands { failed, total });
        }
        Ok(())
    }

    /// Terminal transition: disconnect and raise the cancellation signal
    ///
    /// Only the first call has any effect.
    pub async fn request_exit(&mut self) {
        if self.stats.exit_requested {
            debug!("Exit already requested");
            return;
        }
        info!("Exit requested, disconnecting from gateway");
        self.stats.exit_requested = true;

        if let Err(e) = self.gateway.disconnect().await {
            warn!("Disconnect during exit failed: {}", e);
        }
        self.cancel.cancel();
    }

    /// Drive until the token is cancelled or the exit button is pressed
    pub async fn run_until_cancelled(mut self) -> DriveLoop<Stopped> {
        info!(
            "Starting drive loop with {:?} tick interval",
            self.settings.tick_interval
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick of an interval completes immediately
        ticker.tick().await;

        let mut queue_open = true;
        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(30);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Cancellation observed, leaving drive loop");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Tick failed: {}", e);
                    }
                    // a slow gateway keeps the ticker ready, so take one record here too
                    if queue_open {
                        match self.queue.try_recv() {
                            Ok(record) => {
                                if self.handle_record(&record) == Transition::Exit {
                                    self.request_exit().await;
                                    break;
                                }
                            }
                            Err(TryRecvError::Empty) => {}
                            Err(TryRecvError::Disconnected) => {
                                warn!("Event queue closed, driving on last known state");
                                queue_open = false;
                            }
                        }
                    }
                }

                received = self.queue.recv(), if queue_open => match received {
                    Some(record) => {
                        if self.handle_record(&record) == Transition::Exit {
                            self.request_exit().await;
                            break;
                        }
                    }
                    None => {
                        warn!("Event queue closed, driving on last known state");
                        queue_open = false;
                    }
                },
            }

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                info!(
                    "Drive loop stats: {} events, {} ticks, {} commands ({} failed)",
                    self.stats.events,
                    self.stats.ticks,
                    self.stats.commands,
                    self.stats.failed_commands
                );
                last_stats_time = now;
            }
        }

        info!("Transitioning to Stopped state");
        self.transition()
    }
}

impl DriveLoop<Stopped> {
    /// Disconnect from the gateway and hand back the final stats
    pub async fn shutdown(mut self) -> DriveStats {
        if let Err(e) = self.gateway.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        info!(
            "Drive loop stopped after {} events and {} ticks",
            self.stats.events, self.stats.ticks
        );
        self.stats
    }
}

async fn send_command(
    gateway: &mut dyn VehicleGateway,
    command: DriveCommand,
    stats: &mut DriveStats,
) -> Result<(), GatewayError> {
    stats.commands += 1;
    let result = match command {
        DriveCommand::SetSpeed {
            speed,
            acceleration,
        } => gateway.set_speed(speed, acceleration).await,
        DriveCommand::ChangeLane {
            speed,
            acceleration,
            offset,
        } => gateway.change_lane(speed, acceleration, offset).await,
    };
    if result.is_err() {
        stats.failed_commands += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::state::{ACCELERATE_BUTTON, EXIT_BUTTON};
    use crate::gateway::{GatewayCall, RecordingGateway};
    use crate::joystick::event::{KIND_AXIS, KIND_BUTTON};
    use async_trait::async_trait;

    /// Answers every speed command only after `delay`, and then with a timeout
    struct StalledGateway {
        inner: RecordingGateway,
        delay: Duration,
    }

    #[async_trait]
    impl VehicleGateway for StalledGateway {
        async fn connect(&mut self, target: &GatewayTarget) -> Result<(), GatewayError> {
            self.inner.connect(target).await
        }

        async fn set_speed(&mut self, speed: i32, acceleration: i32) -> Result<(), GatewayError> {
            tokio::time::sleep(self.delay).await;
            self.inner.set_speed(speed, acceleration).await?;
            Err(GatewayError::Timeout(self.delay))
        }

        async fn change_lane(
            &mut self,
            speed: i32,
            acceleration: i32,
            offset: i32,
        ) -> Result<(), GatewayError> {
            self.inner.change_lane(speed, acceleration, offset).await
        }

        async fn disconnect(&mut self) -> Result<(), GatewayError> {
            self.inner.disconnect().await
        }
    }

    fn target() -> GatewayTarget {
        GatewayTarget {
            host: "127.0.0.1".to_string(),
            port: 8005,
            vehicle_id: "car".to_string(),
        }
    }

    fn record(kind: u8, index: u8, value: i16) -> Record {
        RawEvent {
            timestamp: 0,
            value,
            kind,
            index,
        }
        .encode()
    }

    fn settings() -> DriveSettings {
        DriveSettings {
            startup_grace: Duration::ZERO,
            ..DriveSettings::default()
        }
    }

    // x, y / trigger, thumb, thumb2, base4
    fn create(
        gateway: RecordingGateway,
        settings: DriveSettings,
    ) -> (DriveLoop<Connecting>, mpsc::Sender<Record>, CancellationToken) {
        create_boxed(Box::new(gateway), settings)
    }

    fn create_boxed(
        gateway: Box<dyn VehicleGateway>,
        settings: DriveSettings,
    ) -> (DriveLoop<Connecting>, mpsc::Sender<Record>, CancellationToken) {
        let (tx, rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let drive = DriveLoop::create(
            gateway,
            target(),
            settings,
            AxisMap::from_codes(&[0x00, 0x01]),
            ButtonMap::from_codes(&[0x120, 0x121, 0x122, 0x129]),
            rx,
            cancel.clone(),
        );
        (drive, tx, cancel)
    }

    fn commands(log: &RecordingGateway) -> Vec<GatewayCall> {
        log.calls()
            .into_iter()
            .filter(|call| !matches!(call, GatewayCall::Connect(_) | GatewayCall::Disconnect))
            .collect()
    }

    #[tokio::test]
    async fn connect_sends_initial_speed() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log.clone(), settings());
        let drive = drive.connect().await.unwrap();

        assert_eq!(drive.control().current_speed, 400.0);
        assert_eq!(
            log.calls(),
            vec![
                GatewayCall::Connect(target()),
                GatewayCall::SetSpeed {
                    speed: 400,
                    acceleration: 2000
                },
            ]
        );
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() {
        let log = RecordingGateway::new();
        log.set_connect_failing(true);
        let (drive, _tx, _cancel) = create(log, settings());
        assert!(matches!(
            drive.connect().await,
            Err(DriveError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn accelerate_press_then_tick() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();

        let thumb = 1;
        assert_eq!(
            drive.handle_record(&record(KIND_BUTTON, thumb, 1)),
            Transition::Continue
        );
        assert!(drive.control().accelerate);
        assert!(!drive.control().decelerate);

        drive.tick().await.unwrap();
        let expected = (400.0 + (1600.0 - 400.0) / 4.0) as i32;
        assert_eq!(
            commands(&log).last(),
            Some(&GatewayCall::SetSpeed {
                speed: expected,
                acceleration: 2000
            })
        );
    }

    #[tokio::test]
    async fn idle_deceleration_reaches_zero() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();

        drive.control.current_speed = 50.0;
        drive.control.decelerate = true;

        for _ in 0..2 {
            drive.tick().await.unwrap();
        }
        assert_eq!(drive.control().current_speed, 0.0);
        assert!(commands(&log).contains(&GatewayCall::SetSpeed {
            speed: 0,
            acceleration: 2000
        }));
    }

    #[tokio::test]
    async fn full_left_deflection_changes_lane() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();

        drive.handle_record(&record(KIND_AXIS, 0, -32767));
        assert!(drive.control().left);
        assert!(!drive.control().right);

        drive.tick().await.unwrap();
        assert_eq!(
            commands(&log).last(),
            Some(&GatewayCall::ChangeLane {
                speed: 400,
                acceleration: 2000,
                offset: -30
            })
        );
    }

    #[tokio::test]
    async fn malformed_records_are_discarded() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log, settings());
        let mut drive = drive.connect().await.unwrap();

        assert_eq!(drive.handle_record(&[1, 2, 3]), Transition::Continue);
        assert_eq!(drive.stats().discarded, 1);
        assert_eq!(drive.stats().events, 0);
    }

    #[tokio::test]
    async fn failed_commands_do_not_roll_back_state() {
        let log = RecordingGateway::new();
        let (drive, _tx, _cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();
        drive.control.accelerate = true;
        log.set_failing(true);

        let err = drive.tick().await.unwrap_err();
        assert!(matches!(err, DriveError::Commands { failed: 1, total: 1 }));
        assert_eq!(drive.control().current_speed, 700.0);
        assert_eq!(drive.stats().failed_commands, 1);

        log.set_failing(false);
        drive.tick().await.unwrap();
        assert_eq!(drive.control().current_speed, 925.0);
    }

    #[tokio::test]
    async fn exit_press_cancels_once() {
        let log = RecordingGateway::new();
        let (drive, _tx, cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();
        assert!(!cancel.is_cancelled());

        let base4 = 3;
        assert_eq!(
            drive.handle_record(&record(KIND_BUTTON, base4, 1)),
            Transition::Exit
        );
        drive.request_exit().await;
        assert!(cancel.is_cancelled());
        assert!(drive.stats().exit_requested);

        drive.request_exit().await;
        assert!(cancel.is_cancelled());
        let disconnects = log
            .calls()
            .iter()
            .filter(|call| **call == GatewayCall::Disconnect)
            .count();
        assert_eq!(disconnects, 1);
        assert!(!log.is_connected());
        assert_eq!(EXIT_BUTTON, "base4");
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_exits_on_exit_button() {
        let log = RecordingGateway::new();
        let (drive, tx, cancel) = create(log.clone(), settings());
        let drive = drive.connect().await.unwrap();

        tx.send(record(KIND_BUTTON, 1, 1)).await.unwrap();
        tx.send(record(KIND_BUTTON, 3, 1)).await.unwrap();

        let stopped = drive.run_until_cancelled().await;
        assert!(cancel.is_cancelled());
        let stats = stopped.shutdown().await;
        assert_eq!(stats.events, 2);
        assert!(stats.exit_requested);
        assert_eq!(log.calls().last(), Some(&GatewayCall::Disconnect));
        assert_eq!(ACCELERATE_BUTTON, "thumb");
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_while_idle_and_stops_on_cancel() {
        let log = RecordingGateway::new();
        let (drive, tx, cancel) = create(log.clone(), settings());
        let mut drive = drive.connect().await.unwrap();
        drive.control.accelerate = true;

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1100)).await;
            stopper.cancel();
        });

        let stopped = drive.run_until_cancelled().await;
        let stats = stopped.shutdown().await;
        // ticks at 200, 400, ..., 1000 ms
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.events, 0);
        assert!(!stats.exit_requested);
        assert_eq!(log.calls().last(), Some(&GatewayCall::Disconnect));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_survives_closed_queue() {
        let log = RecordingGateway::new();
        let (drive, tx, cancel) = create(log.clone(), settings());
        let drive = drive.connect().await.unwrap();

        tx.send(record(KIND_AXIS, 1, 32767)).await.unwrap();
        drop(tx);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            stopper.cancel();
        });

        let stats = drive.run_until_cancelled().await.shutdown().await;
        assert_eq!(stats.events, 1);
        assert!(stats.ticks >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_button_is_seen_while_gateway_stalls() {
        let log = RecordingGateway::new();
        let gateway = StalledGateway {
            inner: log.clone(),
            delay: Duration::from_millis(250),
        };
        let (drive, tx, cancel) = create_boxed(Box::new(gateway), settings());
        let mut drive = drive.connect().await.unwrap();
        drive.control.decelerate = true;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(record(KIND_BUTTON, 3, 1)).await.unwrap();
        });
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stopper.cancel();
        });

        let start = tokio::time::Instant::now();
        let stats = drive.run_until_cancelled().await.shutdown().await;
        assert!(stats.exit_requested);
        assert_eq!(stats.events, 1);
        assert!(stats.failed_commands > 0);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(log.calls().last(), Some(&GatewayCall::Disconnect));
    }
}
