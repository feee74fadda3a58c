use crate::OrganError;
use crate::clock::{ClockConfig, TimingError};
use crate::output::{DriveMode, ToneOutput};
use core::marker::PhantomData;
use fugit::HertzU32;

pub struct ToneChannelFreqBuildState {}
pub struct ToneChannelOutputBuildState {}

/// One square-wave tone: an owned output pin toggled every `half_period_ticks`.
pub struct ToneChannel<O> {
    pub(crate) output: O,
    pub(crate) frequency: HertzU32,
    pub(crate) half_period_ticks: u32,
    pub(crate) last_toggle_cycle: u64,
}

impl<O: ToneOutput> ToneChannel<O> {
    pub fn frequency(&self) -> HertzU32 {
        self.frequency
    }

    pub fn half_period_ticks(&self) -> u32 {
        self.half_period_ticks
    }

    pub fn last_toggle_cycle(&self) -> u64 {
        self.last_toggle_cycle
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Flip the output if more than a half period has passed since the last flip.
    pub(crate) fn advance(&mut self, cycle: u64) {
        if cycle.wrapping_sub(self.last_toggle_cycle) > u64::from(self.half_period_ticks) {
            let level = self.output.value();
            self.output.set_value(!level);
            self.last_toggle_cycle = cycle;
        }
    }

    pub(crate) fn rephase(&mut self) {
        self.last_toggle_cycle = 0;
    }

    pub(crate) fn silence(&mut self) {
        self.output.set_value(false);
    }

    pub(crate) fn release(&mut self) -> Option<O::Pin> {
        self.output.set_value(false);
        self.output.deinit()
    }
}

pub struct ToneChannelBuilder<T> {
    clock: ClockConfig,
    frequency: HertzU32,
    half_period_ticks: u32,
    _phantom: PhantomData<T>,
}

impl ToneChannelBuilder<ToneChannelFreqBuildState> {
    pub fn new(clock: ClockConfig) -> Result<Self, TimingError> {
        if !clock.is_valid() {
            return Err(TimingError::InvalidClockConfig);
        }

        Ok(Self {
            clock,
            frequency: HertzU32::from_raw(0),
            half_period_ticks: 0,
            _phantom: PhantomData,
        })
    }

    pub fn frequency(
        self,
        frequency: HertzU32,
    ) -> Result<ToneChannelBuilder<ToneChannelOutputBuildState>, TimingError> {
        let half_period_ticks = self
            .clock
            .half_period_ticks(frequency)
            .ok_or(TimingError::FrequencyOutOfRange)?;

        Ok(ToneChannelBuilder {
            clock: self.clock,
            frequency,
            half_period_ticks,
            _phantom: PhantomData,
        })
    }
}

impl ToneChannelBuilder<ToneChannelOutputBuildState> {
    pub fn half_period_ticks(&self) -> u32 {
        self.half_period_ticks
    }

    /// Take ownership of `pin` and drive it low.
    pub fn build<O: ToneOutput>(self, pin: O::Pin) -> Result<ToneChannel<O>, OrganError<O::Error>> {
        let mut output = O::construct(pin).map_err(OrganError::Pin)?;

        output.switch_to_output(false, DriveMode::PushPull);
        output.set_value(false);

        Ok(ToneChannel {
            output,
            frequency: self.frequency,
            half_period_ticks: self.half_period_ticks,
            last_toggle_cycle: 0,
        })
    }
}
