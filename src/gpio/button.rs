use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin};
use tracing::debug;

use super::{EdgeEvent, GpioError, InputMonitor};

/// Stable-window debounce over a raw boolean level.
///
/// A level change only becomes an edge once the new level has been observed
/// continuously for the configured window. Kept free of any hardware handle
/// so the timing behavior is testable on its own.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    stable: bool,
    candidate: Option<(bool, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration, initial: bool) -> Self {
        Self {
            window,
            stable: initial,
            candidate: None,
        }
    }

    /// Feed one raw sample; returns an edge once the new level held for the
    /// full window.
    pub fn update(&mut self, level: bool, now: Instant) -> Option<EdgeEvent> {
        if level == self.stable {
            self.candidate = None;
            return None;
        }

        match self.candidate {
            Some((candidate, since)) if candidate == level => {
                if now.duration_since(since) >= self.window {
                    self.stable = level;
                    self.candidate = None;
                    Some(if level {
                        EdgeEvent::Rising
                    } else {
                        EdgeEvent::Falling
                    })
                } else {
                    None
                }
            }
            _ => {
                self.candidate = Some((level, now));
                None
            }
        }
    }

    pub fn stable_level(&self) -> bool {
        self.stable
    }
}

/// Pushbutton on a pull-up input pin. Pressed pulls the pin low, so the
/// logical level fed to the debouncer is `is_low()`.
pub struct DebouncedButton {
    pin: InputPin,
    debouncer: Debouncer,
}

impl DebouncedButton {
    pub fn new(bcm_pin: u8, debounce: Duration) -> Result<Self, GpioError> {
        let pin = Gpio::new()?.get(bcm_pin)?.into_input_pullup();
        let initial = pin.is_low();
        debug!(pin = bcm_pin, pressed = initial, "Button pin configured");
        Ok(Self {
            pin,
            debouncer: Debouncer::new(debounce, initial),
        })
    }
}

impl InputMonitor for DebouncedButton {
    fn poll_edge(&mut self) -> Option<EdgeEvent> {
        self.debouncer.update(self.pin.is_low(), Instant::now())
    }
}
