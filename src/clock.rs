//! Cycle clock: one hardware timer instance driving the periodic tick.

use crate::vector::MAX_TIMER_INSTANCES;
use fugit::HertzU32;

/// Compare value used by the board presets. At 120 MHz this is a 3.33 us tick.
pub const DEFAULT_COMPARE: u16 = 400;

/// Clock configuration or tone frequency the tick rate cannot support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingError {
    /// Compare value is zero or the tick rate is below 1 Hz
    InvalidClockConfig,
    /// Half period of the requested frequency rounds to less than one tick
    FrequencyOutOfRange,
}

/// Timer input clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div1,
    Div2,
    Div4,
    Div8,
    Div16,
    Div64,
    Div256,
    Div1024,
}

impl Prescaler {
    #[must_use]
    pub const fn divisor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div2 => 2,
            Prescaler::Div4 => 4,
            Prescaler::Div8 => 8,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
            Prescaler::Div256 => 256,
            Prescaler::Div1024 => 1024,
        }
    }
}

/// Counter width the timer is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterMode {
    Count16,
}

/// Waveform generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Waveform {
    /// Counter reloads on compare match, so the timer re-fires on its own.
    MatchFrequency,
}

/// Register-level setup applied to a freshly reserved timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerSetup {
    pub mode: CounterMode,
    pub prescaler: Prescaler,
    pub waveform: Waveform,
}

/// Reference clock, prescaler and compare value. Together they fix the tick rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    pub reference: HertzU32,
    pub prescaler: Prescaler,
    pub compare: u16,
}

impl ClockConfig {
    /// SAMD21 boards, timers clocked from the 48 MHz generator.
    pub const SAMD21: ClockConfig =
        ClockConfig::new(HertzU32::from_raw(48_000_000), Prescaler::Div1, DEFAULT_COMPARE);

    /// SAMD51 boards, timers clocked at 120 MHz.
    pub const SAMD51: ClockConfig =
        ClockConfig::new(HertzU32::from_raw(120_000_000), Prescaler::Div1, DEFAULT_COMPARE);

    #[must_use]
    pub const fn new(reference: HertzU32, prescaler: Prescaler, compare: u16) -> Self {
        Self {
            reference,
            prescaler,
            compare,
        }
    }

    /// A usable configuration produces at least one tick per second.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.compare != 0 && self.ticks_divisor() <= u64::from(self.reference.raw())
    }

    /// Tick rate, rounded down to a whole number of hertz.
    #[must_use]
    pub fn tick_rate(&self) -> HertzU32 {
        let divisor = self.ticks_divisor().max(1);
        // Quotient never exceeds the reference clock, so it fits.
        HertzU32::from_raw((u64::from(self.reference.raw()) / divisor) as u32)
    }

    /// Number of ticks in half a period of `frequency`, rounded to nearest.
    ///
    /// Computed from the reference clock directly so a fractional tick rate
    /// does not bias the result. Returns `None` when the half period would be
    /// shorter than one tick.
    #[must_use]
    pub fn half_period_ticks(&self, frequency: HertzU32) -> Option<u32> {
        let denominator = self.ticks_divisor() * 2 * u64::from(frequency.raw());

        if denominator == 0 {
            return None;
        }

        let ticks = (u64::from(self.reference.raw()) + denominator / 2) / denominator;

        match u32::try_from(ticks) {
            Ok(0) | Err(_) => None,
            Ok(ticks) => Some(ticks),
        }
    }

    #[must_use]
    pub fn setup(&self) -> TimerSetup {
        TimerSetup {
            mode: CounterMode::Count16,
            prescaler: self.prescaler,
            waveform: Waveform::MatchFrequency,
        }
    }

    fn ticks_divisor(&self) -> u64 {
        u64::from(self.prescaler.divisor()) * u64::from(self.compare)
    }
}

/// Access to a family of identical hardware timer instances.
///
/// Implemented by the board support layer on top of the timer registers.
/// Every method addresses one instance by index and must not block beyond a
/// register synchronisation wait.
pub trait TimerBank {
    /// Number of timer instances on the chip.
    fn instance_count(&self) -> usize;

    /// Whether the instance is already enabled, i.e. owned by someone.
    fn is_enabled(&self, index: usize) -> bool;

    /// Reset the instance, apply `setup`, enable it and leave the counter stopped.
    fn configure(&mut self, index: usize, setup: &TimerSetup);

    fn set_compare(&mut self, index: usize, compare: u16);

    fn match_pending(&self, index: usize) -> bool;

    fn clear_match(&mut self, index: usize);

    /// Unmask the compare match interrupt, both in the timer and the interrupt controller.
    fn enable_match_interrupt(&mut self, index: usize);

    fn disable_match_interrupt(&mut self, index: usize);

    /// Restart the counter from zero.
    fn retrigger(&mut self, index: usize);

    /// Stop the counter.
    fn halt(&mut self, index: usize);

    /// Reset the instance to its power-on state, which also disables it.
    fn reset(&mut self, index: usize);

    /// Keep the core out of sleep modes that would gate the timer clock.
    ///
    /// Called once when tones start. Chips whose timers keep running in sleep
    /// (SAMD51) leave this empty.
    fn prevent_sleep(&mut self) {}

    /// Undo one [`TimerBank::prevent_sleep`]. Called when tones stop.
    fn allow_sleep(&mut self) {}
}

/// The timer instance reserved for tone generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleClock {
    index: usize,
    compare: u16,
}

impl CycleClock {
    /// Claim the highest-numbered timer instance that is not enabled.
    ///
    /// Only the first [`MAX_TIMER_INSTANCES`] instances are considered, since
    /// the interrupt vector table cannot route the others.
    pub fn reserve<T: TimerBank>(bank: &mut T, config: &ClockConfig) -> Option<Self> {
        let index = (0..bank.instance_count().min(MAX_TIMER_INSTANCES))
            .rev()
            .find(|&index| !bank.is_enabled(index))?;

        bank.configure(index, &config.setup());
        debug!("reserved timer {}", index);

        Some(Self {
            index,
            compare: config.compare,
        })
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn arm<T: TimerBank>(&self, bank: &mut T) {
        bank.set_compare(self.index, self.compare);
        bank.clear_match(self.index);
        bank.enable_match_interrupt(self.index);
        bank.retrigger(self.index);
        bank.prevent_sleep();
    }

    pub fn disarm<T: TimerBank>(&self, bank: &mut T) {
        bank.halt(self.index);
        bank.disable_match_interrupt(self.index);
        bank.allow_sleep();
    }

    pub fn is_pending<T: TimerBank>(&self, bank: &T) -> bool {
        bank.match_pending(self.index)
    }

    /// Clear the match flag so the next compare match raises the interrupt again.
    pub fn acknowledge<T: TimerBank>(&self, bank: &mut T) {
        bank.clear_match(self.index);
    }

    pub fn release<T: TimerBank>(self, bank: &mut T) {
        bank.reset(self.index);
        debug!("released timer {}", self.index);
    }
}
