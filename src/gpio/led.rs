use rppal::gpio::{Gpio, OutputPin};
use tracing::debug;

use super::{GpioError, OutputActuator};

/// Status LED on an output pin.
///
/// The reference board sinks the LED, so logical on is electrically low;
/// `active_low` carries that wiring choice into configuration.
pub struct StatusLed {
    pin: OutputPin,
    active_low: bool,
}

impl StatusLed {
    pub fn new(bcm_pin: u8, active_low: bool) -> Result<Self, GpioError> {
        let pin = Gpio::new()?.get(bcm_pin)?.into_output();
        debug!(pin = bcm_pin, active_low, "LED pin configured");
        let mut led = Self { pin, active_low };
        led.set_active(false);
        Ok(led)
    }
}

impl OutputActuator for StatusLed {
    fn set_active(&mut self, active: bool) {
        if active != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}
