//! Digital output capability driven by the tone channels.

use core::convert::Infallible;
use embedded_hal::digital::{PinState, StatefulOutputPin};

/// Output driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveMode {
    PushPull,
    OpenDrain,
}

/// A digital pin a tone channel can own and toggle.
///
/// `value` and `set_value` are called from interrupt context and must not block.
/// `value` takes `&mut self` to match `StatefulOutputPin::is_set_high`.
pub trait ToneOutput: Sized {
    /// Identity of the physical pin handed to [`ToneOutput::construct`].
    type Pin;
    type Error;

    /// Take ownership of `pin`.
    fn construct(pin: Self::Pin) -> Result<Self, Self::Error>;

    fn switch_to_output(&mut self, level: bool, drive: DriveMode);

    fn value(&mut self) -> bool;

    fn set_value(&mut self, level: bool);

    /// Stop driving the pin and hand it back to the caller.
    ///
    /// Returns `None` if already deinitialized. Further calls other than
    /// `deinited` are no-ops.
    fn deinit(&mut self) -> Option<Self::Pin>;

    fn deinited(&self) -> bool;
}

/// [`ToneOutput`] over any `embedded-hal` stateful output pin.
///
/// The pin is expected to already be in output mode, so `switch_to_output`
/// only applies the initial level: the drive mode is fixed by the pin's HAL
/// type and cannot be changed through `embedded-hal`. Pin errors are dropped
/// because the toggle path has nowhere to report them.
pub struct HalOutput<P> {
    pin: Option<P>,
}

impl<P: StatefulOutputPin> HalOutput<P> {
    /// Hand the pin back, if it has not been deinitialized.
    pub fn into_inner(mut self) -> Option<P> {
        self.pin.take()
    }
}

impl<P: StatefulOutputPin> ToneOutput for HalOutput<P> {
    type Pin = P;
    type Error = Infallible;

    fn construct(pin: P) -> Result<Self, Infallible> {
        Ok(Self { pin: Some(pin) })
    }

    fn switch_to_output(&mut self, level: bool, _drive: DriveMode) {
        self.set_value(level);
    }

    fn value(&mut self) -> bool {
        self.pin
            .as_mut()
            .is_some_and(|pin| pin.is_set_high().unwrap_or(false))
    }

    fn set_value(&mut self, level: bool) {
        if let Some(pin) = self.pin.as_mut() {
            let _ = pin.set_state(PinState::from(level));
        }
    }

    fn deinit(&mut self) -> Option<P> {
        let mut pin = self.pin.take()?;
        let _ = pin.set_low();

        Some(pin)
    }

    fn deinited(&self) -> bool {
        self.pin.is_none()
    }
}
