//! Pin multiplexing collaborator.
//!
//! Board support code owns the GPIO ports; the driver only asks for the bus
//! lines to be switched between the SDIO alternate function and the card
//! detect probe.

use embedded_hal::digital::v2::InputPin;

/// How the SDIO lines should be configured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    /// CLK, CMD and DAT0 in the SDIO alternate function
    Sdio1Bit,
    /// CLK, CMD and DAT0-DAT3 in the SDIO alternate function
    Sdio4Bit,
    /// DAT3 as an input with the internal pull-down enabled
    Dat3Probe,
}

/// Board hook for the SDIO pins
pub trait BusPins {
    /// Reconfigure the bus lines
    fn set_mode(&mut self, mode: PinMode);

    /// Level of DAT3, only meaningful in [`PinMode::Dat3Probe`].
    /// A card's internal pull-up wins over the weak pull-down.
    fn dat3_is_high(&mut self) -> bool;
}

/// For boards whose pins are configured once up-front and never probed.
/// Card detection always reports a card.
pub struct StaticPins;

impl BusPins for StaticPins {
    fn set_mode(&mut self, _mode: PinMode) {}

    fn dat3_is_high(&mut self) -> bool {
        true
    }
}

/// Adapter for boards where DAT3 is reconfigured by a closure and read
/// through an `embedded-hal` input pin.
pub struct ProbePins<F, P> {
    set_mode: F,
    dat3: P,
}

impl<F: FnMut(PinMode), P: InputPin> ProbePins<F, P> {
    pub fn new(set_mode: F, dat3: P) -> Self {
        Self { set_mode, dat3 }
    }
}

impl<F: FnMut(PinMode), P: InputPin> BusPins for ProbePins<F, P> {
    fn set_mode(&mut self, mode: PinMode) {
        (self.set_mode)(mode)
    }

    fn dat3_is_high(&mut self) -> bool {
        // A pin that can't be read is treated as no card
        self.dat3.is_high().unwrap_or(false)
    }
}
