use crate::joystick::event::RawEvent;
use crate::joystick::names::{AxisMap, ButtonMap};
use tracing::{debug, info, warn};

// Fixed control bindings
pub const ACCELERATE_BUTTON: &str = "thumb";
pub const DECELERATE_BUTTON: &str = "thumb2";
pub const EXIT_BUTTON: &str = "base4";
pub const LATERAL_AXIS: &str = "x";
pub const THROTTLE_AXIS: &str = "y";

/// Throttle deflection needed to count as a deliberate push or pull
pub const THROTTLE_THRESHOLD: f32 = 0.9;

/// Numeric bounds of the integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveLimits {
    pub max_speed: f64,
    pub acceleration: i32,
    /// Speeds at or below this snap to a full stop while decelerating
    pub stop_threshold: f64,
    pub lane_step: f64,
    pub lane_bound: f64,
}

impl Default for DriveLimits {
    fn default() -> Self {
        Self {
            max_speed: 1600.0,
            acceleration: 2000,
            stop_threshold: 200.0,
            lane_step: 30.0,
            lane_bound: 100.0,
        }
    }
}

/// Command for the vehicle gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    SetSpeed {
        speed: i32,
        acceleration: i32,
    },
    ChangeLane {
        speed: i32,
        acceleration: i32,
        offset: i32,
    },
}

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Exit,
}

/// Speed, lane and the four control flags
///
/// Owned by the drive loop. Events flip the flags; [`ControlState::integrate`]
/// turns the flags into new speed/lane values once per tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    pub current_speed: f64,
    pub current_lane: f64,
    pub accelerate: bool,
    pub decelerate: bool,
    pub left: bool,
    pub right: bool,
}

impl ControlState {
    pub fn new(initial_speed: f64) -> Self {
        Self {
            current_speed: initial_speed,
            ..Self::default()
        }
    }

    /// Apply a decoded event, resolving its index through the device maps
    pub fn apply(&mut self, event: &RawEvent, axes: &AxisMap, buttons: &ButtonMap) -> Transition {
        let mut transition = Transition::Continue;

        if event.is_button() {
            match buttons.get(event.index) {
                Some(button) => {
                    if self.press_button(button, event.value != 0) == Transition::Exit {
                        transition = Transition::Exit;
                    }
                }
                None => warn!("Button index {} not in button map, ignoring", event.index),
            }
        }

        if event.is_axis() {
            match axes.get(event.index) {
                Some(axis) => self.move_axis(axis, event.normalized()),
                None => warn!("Axis index {} not in axis map, ignoring", event.index),
            }
        }

        transition
    }

    pub fn press_button(&mut self, button: &str, pressed: bool) -> Transition {
        if pressed {
            info!("{} pressed", button);
        } else {
            info!("{} released", button);
        }

        match (button, pressed) {
            (ACCELERATE_BUTTON, true) => self.set_accelerating(),
            // releasing the throttle never coasts
            (ACCELERATE_BUTTON, false) | (DECELERATE_BUTTON, _) => self.set_decelerating(),
            (EXIT_BUTTON, true) => return Transition::Exit,
            _ => debug!("No binding for button {}", button),
        }
        Transition::Continue
    }

    pub fn move_axis(&mut self, axis: &str, value: f32) {
        debug!("{}: {:.3}", axis, value);

        match axis {
            LATERAL_AXIS => {
                // centred input keeps the last direction
                if value <= -1.0 {
                    self.left = true;
                    self.right = false;
                } else if value >= 1.0 {
                    self.right = true;
                    self.left = false;
                }
            }
            THROTTLE_AXIS => {
                if value <= -THROTTLE_THRESHOLD {
                    self.set_accelerating();
                } else {
                    self.set_decelerating();
                }
            }
            _ => debug!("No binding for axis {}", axis),
        }
    }

    fn set_accelerating(&mut self) {
        self.accelerate = true;
        self.decelerate = false;
    }

    fn set_decelerating(&mut self) {
        self.accelerate = false;
        self.decelerate = true;
    }

    /// One integration step; returns the commands to send, in order
    pub fn integrate(&mut self, limits: &DriveLimits) -> Vec<DriveCommand> {
        let mut commands = Vec::new();

        if self.accelerate {
            self.current_speed += (limits.max_speed - self.current_speed) / 4.0;
            if self.current_speed >= limits.max_speed {
                self.current_speed = limits.max_speed;
            }
            commands.push(self.speed_command(limits));
        }

        if self.decelerate {
            self.current_speed -= self.current_speed / 3.0;
            if self.current_speed <= limits.stop_threshold {
                self.current_speed = 0.0;
            }
            commands.push(self.speed_command(limits));
        }

        if self.left && self.current_lane >= -limits.lane_bound {
            self.current_lane -= limits.lane_step;
            commands.push(self.lane_command(limits));
        }

        if self.right && self.current_lane <= limits.lane_bound {
            self.current_lane += limits.lane_step;
            commands.push(self.lane_command(limits));
        }

        commands
    }

    fn speed_command(&self, limits: &DriveLimits) -> DriveCommand {
        DriveCommand::SetSpeed {
            speed: self.current_speed as i32,
            acceleration: limits.acceleration,
        }
    }

    fn lane_command(&self, limits: &DriveLimits) -> DriveCommand {
        DriveCommand::ChangeLane {
            speed: self.current_speed as i32,
            acceleration: limits.acceleration,
            offset: self.current_lane as i32,
        }
    }
}
