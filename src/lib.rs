//! Interrupt-driven square-wave tone generation on plain GPIO pins.
//!
//! One hardware timer fires a periodic interrupt (a *tick*). Every tick the
//! [`Scheduler`] advances a cycle counter and flips each tone's pin once more
//! than its half period has elapsed since the last flip. All timing is in
//! whole ticks, so nothing on the interrupt path divides or touches floats.
//!
//! A board wires this up by implementing [`TimerBank`] over its timer
//! registers, placing a [`Scheduler`] and an [`IrqRegistry`] in statics and
//! forwarding the timer interrupt vectors to [`IrqRegistry::dispatch`].
#![no_std]

#[macro_use]
mod fmt;

mod channel;
pub mod clock;
mod output;
mod vector;

use core::cell::RefCell;
use core::convert::Infallible;
use critical_section::{CriticalSection, Mutex};
use fugit::HertzU32;
use heapless::Vec;

pub use channel::{
    ToneChannel, ToneChannelBuilder, ToneChannelFreqBuildState, ToneChannelOutputBuildState,
};
pub use clock::{ClockConfig, CycleClock, Prescaler, TimerBank, TimerSetup, TimingError};
pub use output::{DriveMode, HalOutput, ToneOutput};
pub use vector::{IrqRegistry, MAX_TIMER_INSTANCES, TimerInterrupt, VectorError};

/// Default channel table capacity.
pub const MAX_TONES: usize = 56;

/// Position of a channel in the table, in insertion order.
pub type ChannelId = usize;

/// Errors that can occur during tone scheduler operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OrganError<E = Infallible> {
    /// The clock configuration yields a tick rate below 1 Hz
    InvalidClockConfig,
    /// No tones were given to construct
    NoTones,
    /// Every timer instance is already enabled
    HardwareUnavailable,
    /// The channel table is full
    CapacityExceeded,
    /// The requested frequency is too high for the tick rate
    FrequencyOutOfRange,
    /// Another user already holds the scheduler
    ResourceInUse,
    /// Tone generation already started
    AlreadyRunning,
    /// Tone generation is not started
    NotRunning,
    /// The operation is not allowed while tones are playing
    InvalidState,
    /// The handle was deinitialized
    Deinitialized,
    /// The output pin could not be claimed
    Pin(E),
}

impl<E> From<TimingError> for OrganError<E> {
    fn from(error: TimingError) -> Self {
        match error {
            TimingError::InvalidClockConfig => OrganError::InvalidClockConfig,
            TimingError::FrequencyOutOfRange => OrganError::FrequencyOutOfRange,
        }
    }
}

impl<E> From<VectorError> for OrganError<E> {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::OutOfRange => OrganError::HardwareUnavailable,
            VectorError::Occupied => OrganError::ResourceInUse,
        }
    }
}

struct State<T, O, const N: usize> {
    timers: T,
    clock: Option<CycleClock>,
    users: u8,
    running: bool,
    cycle: u64,
    channels: Vec<ToneChannel<O>, N>,
}

impl<T: TimerBank, O: ToneOutput, const N: usize> State<T, O, N> {
    fn tick(&mut self) {
        if !self.running {
            return;
        }

        self.cycle = self.cycle.wrapping_add(1);
        let cycle = self.cycle;

        for channel in self.channels.iter_mut() {
            channel.advance(cycle);
        }
    }

    fn halt(&mut self) {
        if let Some(clock) = self.clock {
            clock.disarm(&mut self.timers);
        }

        self.running = false;

        for channel in self.channels.iter_mut() {
            channel.silence();
        }
    }

    /// Release every channel and collect the pins handed back.
    fn release_channels(&mut self) -> Vec<O::Pin, N> {
        let mut pins = Vec::new();

        for channel in self.channels.iter_mut() {
            if let Some(pin) = channel.release() {
                // At most one pin per channel.
                let _ = pins.push(pin);
            }
        }

        self.channels.clear();
        pins
    }

    /// Drop one user, giving the timer back when it was the last.
    fn leave(&mut self, cs: CriticalSection<'_>, vectors: &IrqRegistry) {
        self.users = self.users.saturating_sub(1);

        if self.users == 0
            && let Some(clock) = self.clock.take()
        {
            vectors.unregister(cs, clock.index());
            clock.release(&mut self.timers);
        }
    }
}

/// Tone scheduler context: the timer bank, the reserved timer and the channel table.
///
/// Meant to live in a `static`. At most one [`OrganOut`] can hold it at a time.
pub struct Scheduler<T, O, const N: usize = MAX_TONES> {
    config: ClockConfig,
    vectors: &'static IrqRegistry,
    state: Mutex<RefCell<State<T, O, N>>>,
}

impl<T, O, const N: usize> Scheduler<T, O, N>
where
    T: TimerBank + Send + 'static,
    O: ToneOutput + Send + 'static,
{
    #[must_use]
    pub const fn new(timers: T, config: ClockConfig, vectors: &'static IrqRegistry) -> Self {
        Self {
            config,
            vectors,
            state: Mutex::new(RefCell::new(State {
                timers,
                clock: None,
                users: 0,
                running: false,
                cycle: 0,
                channels: Vec::new(),
            })),
        }
    }

    /// Like [`Scheduler::new`], but rejects a clock configuration that cannot tick.
    pub fn try_new(
        timers: T,
        config: ClockConfig,
        vectors: &'static IrqRegistry,
    ) -> Result<Self, OrganError> {
        if !config.is_valid() {
            return Err(OrganError::InvalidClockConfig);
        }

        Ok(Self::new(timers, config, vectors))
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn tick_rate(&self) -> HertzU32 {
        self.config.tick_rate()
    }

    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).running)
    }

    /// Number of live [`OrganOut`] handles.
    pub fn users(&self) -> u8 {
        critical_section::with(|cs| self.state.borrow_ref(cs).users)
    }

    /// Index of the reserved hardware timer, if any.
    pub fn reserved_timer(&self) -> Option<usize> {
        critical_section::with(|cs| self.state.borrow_ref(cs).clock.map(|clock| clock.index()))
    }

    /// Ticks since the last `start`.
    pub fn cycle(&self) -> u64 {
        critical_section::with(|cs| self.state.borrow_ref(cs).cycle)
    }

    pub fn channel_count(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).channels.len())
    }

    pub fn with_channel<R>(
        &self,
        channel_id: ChannelId,
        f: impl FnOnce(&ToneChannel<O>) -> R,
    ) -> Option<R> {
        critical_section::with(|cs| self.state.borrow_ref(cs).channels.get(channel_id).map(f))
    }

    /// Advance one tick and flip every channel that is due.
    ///
    /// Does nothing unless started. Called by the timer interrupt through
    /// [`TimerInterrupt::on_timer_match`]; exposed for driving the scheduler
    /// from a different time source.
    pub fn irq_handler(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).tick());
    }
}

impl<T, O, const N: usize> TimerInterrupt for Scheduler<T, O, N>
where
    T: TimerBank + Send + 'static,
    O: ToneOutput + Send + 'static,
{
    fn on_timer_match(&self, index: usize) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;

            let Some(clock) = state.clock.filter(|clock| clock.index() == index) else {
                return;
            };

            if !clock.is_pending(&state.timers) {
                return;
            }

            state.tick();
            clock.acknowledge(&mut state.timers);
            trace!("tick {} on timer {}", state.cycle, index);
        });
    }
}

/// A live user of a [`Scheduler`]: the tones it plays and their lifecycle.
///
/// Dropping the handle deinitializes it.
pub struct OrganOut<T, O, const N: usize = MAX_TONES>
where
    T: TimerBank + Send + 'static,
    O: ToneOutput + Send + 'static,
{
    scheduler: &'static Scheduler<T, O, N>,
    live: bool,
}

impl<T, O, const N: usize> OrganOut<T, O, N>
where
    T: TimerBank + Send + 'static,
    O: ToneOutput + Send + 'static,
{
    /// Claim `scheduler`, reserve a timer and add every `(pin, frequency)` pair in order.
    ///
    /// Construction is all-or-nothing: frequencies and capacity are checked
    /// before any pin is claimed, and if a pin fails to construct the tones
    /// added so far are released along with the timer.
    pub fn construct<I>(
        scheduler: &'static Scheduler<T, O, N>,
        tones: I,
    ) -> Result<Self, OrganError<O::Error>>
    where
        I: IntoIterator<Item = (O::Pin, HertzU32)>,
    {
        let mut pending: Vec<(O::Pin, HertzU32), N> = Vec::new();

        for tone in tones {
            if pending.push(tone).is_err() {
                return Err(OrganError::CapacityExceeded);
            }
        }

        if pending.is_empty() {
            return Err(OrganError::NoTones);
        }

        let mut builders: Vec<(O::Pin, ToneChannelBuilder<ToneChannelOutputBuildState>), N> =
            Vec::new();

        for (pin, frequency) in pending {
            let builder = ToneChannelBuilder::new(scheduler.config)?.frequency(frequency)?;
            // Same length as `pending`.
            let _ = builders.push((pin, builder));
        }

        critical_section::with(|cs| -> Result<Self, OrganError<O::Error>> {
            let mut state = scheduler.state.borrow_ref_mut(cs);
            let state = &mut *state;

            if state.users > 0 {
                warn!("scheduler already in use");
                return Err(OrganError::ResourceInUse);
            }

            if state.clock.is_none() {
                let Some(clock) = CycleClock::reserve(&mut state.timers, &scheduler.config) else {
                    warn!("no free timer");
                    return Err(OrganError::HardwareUnavailable);
                };

                if let Err(error) = scheduler.vectors.register(cs, clock.index(), scheduler) {
                    clock.release(&mut state.timers);
                    return Err(error.into());
                }

                state.clock = Some(clock);
            }

            state.users += 1;
            state.running = false;
            state.cycle = 0;
            state.channels.clear();

            for (pin, builder) in builders {
                let channel = match builder.build::<O>(pin) {
                    Ok(channel) => channel,
                    Err(error) => {
                        warn!("pin construction failed, rolling back");
                        let _ = state.release_channels();
                        state.leave(cs, scheduler.vectors);
                        return Err(error);
                    }
                };

                // Capacity was checked while collecting `pending`.
                let _ = state.channels.push(channel);
            }

            info!(
                "organout constructed: {} tones, tick rate {} Hz",
                state.channels.len(),
                scheduler.config.tick_rate().raw()
            );

            Ok(Self {
                scheduler,
                live: true,
            })
        })
    }

    /// Append a tone. Only allowed while stopped.
    pub fn add(
        &mut self,
        pin: O::Pin,
        frequency: HertzU32,
    ) -> Result<ChannelId, OrganError<O::Error>> {
        self.ensure_live()?;

        critical_section::with(|cs| -> Result<ChannelId, OrganError<O::Error>> {
            let mut state = self.scheduler.state.borrow_ref_mut(cs);

            if state.running {
                return Err(OrganError::InvalidState);
            }

            if state.channels.is_full() {
                return Err(OrganError::CapacityExceeded);
            }

            let channel = ToneChannelBuilder::new(self.scheduler.config)?
                .frequency(frequency)?
                .build::<O>(pin)?;

            debug!(
                "tone {} Hz, half period {} ticks",
                frequency.raw(),
                channel.half_period_ticks()
            );

            if state.channels.push(channel).is_err() {
                return Err(OrganError::CapacityExceeded);
            }

            Ok(state.channels.len() - 1)
        })
    }

    /// Reset every tone to phase zero and arm the timer interrupt.
    pub fn start(&mut self) -> Result<(), OrganError<O::Error>> {
        self.ensure_live()?;

        critical_section::with(|cs| {
            let mut state = self.scheduler.state.borrow_ref_mut(cs);
            let state = &mut *state;

            if state.running {
                return Err(OrganError::AlreadyRunning);
            }

            let Some(clock) = state.clock else {
                return Err(OrganError::InvalidState);
            };

            state.running = true;
            state.cycle = 0;

            for channel in state.channels.iter_mut() {
                channel.rephase();
            }

            clock.arm(&mut state.timers);
            debug!("started on timer {}", clock.index());

            Ok(())
        })
    }

    /// Disarm the timer interrupt and drive every output low.
    pub fn stop(&mut self) -> Result<(), OrganError<O::Error>> {
        self.ensure_live()?;

        critical_section::with(|cs| {
            let mut state = self.scheduler.state.borrow_ref_mut(cs);

            if !state.running {
                return Err(OrganError::NotRunning);
            }

            state.halt();
            debug!("stopped after {} ticks", state.cycle);

            Ok(())
        })
    }

    /// Release every pin, and the timer if this was the last user.
    ///
    /// Returns the released pins in channel order so they can be reused.
    /// Calling it again returns nothing.
    pub fn deinit(&mut self) -> Vec<O::Pin, N> {
        if !self.live {
            return Vec::new();
        }

        let pins = critical_section::with(|cs| {
            let mut state = self.scheduler.state.borrow_ref_mut(cs);

            if state.running {
                state.halt();
            }

            let pins = state.release_channels();
            state.leave(cs, self.scheduler.vectors);
            pins
        });

        self.live = false;
        info!("organout deinitialized, {} pins released", pins.len());

        pins
    }

    /// Whether every pin this handle owned has been released.
    pub fn deinited(&self) -> bool {
        !self.live
            || critical_section::with(|cs| {
                self.scheduler
                    .state
                    .borrow_ref(cs)
                    .channels
                    .iter()
                    .all(|channel| channel.output().deinited())
            })
    }

    pub fn scheduler(&self) -> &'static Scheduler<T, O, N> {
        self.scheduler
    }

    fn ensure_live(&self) -> Result<(), OrganError<O::Error>> {
        if !self.live {
            return Err(OrganError::Deinitialized);
        }

        Ok(())
    }
}

impl<T, O, const N: usize> Drop for OrganOut<T, O, N>
where
    T: TimerBank + Send + 'static,
    O: ToneOutput + Send + 'static,
{
    fn drop(&mut self) {
        let _ = self.deinit();
    }
}
