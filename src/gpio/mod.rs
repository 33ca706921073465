//! GPIO collaborators: the debounced pushbutton and the status LED.
//!
//! The agent core only sees the two seam traits defined here; the rppal
//! backed implementations live in [`button`] and [`led`].
//!
//! ```text
//! Button pin ──► DebouncedButton ──► EdgeEvent ──► DeviceAgent
//! DeviceAgent ──► StatusLed ──► LED pin
//! ```

pub mod button;
pub mod led;

pub use button::DebouncedButton;
pub use led::StatusLed;

/// A debounced transition of the input from one logical level to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEvent {
    /// Button went from released to pressed.
    Rising,
    /// Button went from pressed to released.
    Falling,
}

// GPIO errors
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Failed to access GPIO peripheral: {0}")]
    PeripheralError(#[from] rppal::gpio::Error),
}

/// Source of debounced edge events, polled once per control-loop tick.
pub trait InputMonitor {
    fn poll_edge(&mut self) -> Option<EdgeEvent>;
}

/// Boolean physical output. `set_active(true)` means logically on;
/// electrical polarity is an implementation concern.
pub trait OutputActuator {
    fn set_active(&mut self, active: bool);
}
