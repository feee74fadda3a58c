#![allow(dead_code)]

use fugit::HertzU32;
use organout::{
    ClockConfig, DriveMode, IrqRegistry, Prescaler, Scheduler, TimerBank, TimerSetup, ToneOutput,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

pub fn hz(value: u32) -> HertzU32 {
    HertzU32::from_raw(value)
}

/// 1 kHz tick rate: a 100 Hz tone has a half period of 5 ticks.
pub fn khz_config() -> ClockConfig {
    ClockConfig::new(hz(1_000_000), Prescaler::Div1, 1_000)
}

/// 25 MHz tick rate, 40 ns per tick.
pub fn fast_config() -> ClockConfig {
    ClockConfig::new(hz(100_000_000), Prescaler::Div1, 4)
}

#[derive(Debug, Default, Clone)]
pub struct TimerRegs {
    pub enabled: Vec<bool>,
    pub setup: Vec<Option<TimerSetup>>,
    pub compare: Vec<u16>,
    pub pending: Vec<bool>,
    pub irq_enabled: Vec<bool>,
    pub counting: Vec<bool>,
    pub configure_calls: usize,
    pub reset_calls: usize,
    /// Outstanding `prevent_sleep` requests.
    pub sleep_holds: usize,
}

/// Timer bank backed by shared registers the test can inspect.
pub struct MockTimers {
    regs: Arc<Mutex<TimerRegs>>,
}

impl MockTimers {
    pub fn new(instances: usize) -> (Self, Arc<Mutex<TimerRegs>>) {
        let regs = Arc::new(Mutex::new(TimerRegs {
            enabled: vec![false; instances],
            setup: vec![None; instances],
            compare: vec![0; instances],
            pending: vec![false; instances],
            irq_enabled: vec![false; instances],
            counting: vec![false; instances],
            ..TimerRegs::default()
        }));

        (
            Self {
                regs: Arc::clone(&regs),
            },
            regs,
        )
    }
}

impl TimerBank for MockTimers {
    fn instance_count(&self) -> usize {
        self.regs.lock().unwrap().enabled.len()
    }

    fn is_enabled(&self, index: usize) -> bool {
        self.regs.lock().unwrap().enabled[index]
    }

    fn configure(&mut self, index: usize, setup: &TimerSetup) {
        let mut regs = self.regs.lock().unwrap();
        regs.enabled[index] = true;
        regs.setup[index] = Some(*setup);
        regs.counting[index] = false;
        regs.configure_calls += 1;
    }

    fn set_compare(&mut self, index: usize, compare: u16) {
        self.regs.lock().unwrap().compare[index] = compare;
    }

    fn match_pending(&self, index: usize) -> bool {
        self.regs.lock().unwrap().pending[index]
    }

    fn clear_match(&mut self, index: usize) {
        self.regs.lock().unwrap().pending[index] = false;
    }

    fn enable_match_interrupt(&mut self, index: usize) {
        self.regs.lock().unwrap().irq_enabled[index] = true;
    }

    fn disable_match_interrupt(&mut self, index: usize) {
        self.regs.lock().unwrap().irq_enabled[index] = false;
    }

    fn retrigger(&mut self, index: usize) {
        self.regs.lock().unwrap().counting[index] = true;
    }

    fn halt(&mut self, index: usize) {
        self.regs.lock().unwrap().counting[index] = false;
    }

    fn reset(&mut self, index: usize) {
        let mut regs = self.regs.lock().unwrap();
        regs.enabled[index] = false;
        regs.setup[index] = None;
        regs.compare[index] = 0;
        regs.pending[index] = false;
        regs.irq_enabled[index] = false;
        regs.counting[index] = false;
        regs.reset_calls += 1;
    }

    fn prevent_sleep(&mut self) {
        self.regs.lock().unwrap().sleep_holds += 1;
    }

    fn allow_sleep(&mut self) {
        let mut regs = self.regs.lock().unwrap();
        regs.sleep_holds = regs
            .sleep_holds
            .checked_sub(1)
            .expect("allow_sleep without prevent_sleep");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPinError;

/// Observable state of one mock pin, shared between the test and the output.
#[derive(Debug, Clone, Default)]
pub struct PinMonitor {
    level: Arc<AtomicBool>,
    claimed: Arc<AtomicBool>,
    constructs: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    broken: bool,
}

impl PinMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pin whose construction always fails.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub fn force_level(&self, level: bool) {
        self.level.store(level, Ordering::SeqCst);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    pub fn constructs(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub struct MockOutput {
    monitor: PinMonitor,
    deinited: bool,
}

impl ToneOutput for MockOutput {
    type Pin = PinMonitor;
    type Error = MockPinError;

    fn construct(pin: PinMonitor) -> Result<Self, MockPinError> {
        if pin.broken || pin.is_claimed() {
            return Err(MockPinError);
        }

        pin.claimed.store(true, Ordering::SeqCst);
        pin.constructs.fetch_add(1, Ordering::SeqCst);
        // Hardware pins power up in an arbitrary state.
        pin.level.store(true, Ordering::SeqCst);

        Ok(Self {
            monitor: pin,
            deinited: false,
        })
    }

    fn switch_to_output(&mut self, level: bool, _drive: DriveMode) {
        self.set_value(level);
    }

    fn value(&mut self) -> bool {
        self.monitor.level()
    }

    fn set_value(&mut self, level: bool) {
        if !self.deinited {
            self.monitor.level.store(level, Ordering::SeqCst);
        }
    }

    fn deinit(&mut self) -> Option<PinMonitor> {
        if self.deinited {
            return None;
        }

        self.deinited = true;
        self.monitor.claimed.store(false, Ordering::SeqCst);
        self.monitor.releases.fetch_add(1, Ordering::SeqCst);

        Some(self.monitor.clone())
    }

    fn deinited(&self) -> bool {
        self.deinited
    }
}

pub type TestScheduler<const N: usize> = Scheduler<MockTimers, MockOutput, N>;

/// A scheduler and its vector table with `'static` lifetime, as firmware would declare them.
pub fn leak_scheduler<const N: usize>(
    timers: MockTimers,
    config: ClockConfig,
) -> (&'static TestScheduler<N>, &'static IrqRegistry) {
    let vectors: &'static IrqRegistry = Box::leak(Box::new(IrqRegistry::new()));
    let scheduler = Box::leak(Box::new(Scheduler::new(timers, config, vectors)));

    (scheduler, vectors)
}

/// Tones at `frequencies`, each on a fresh monitor.
pub fn tones(frequencies: &[u32]) -> (Vec<(PinMonitor, HertzU32)>, Vec<PinMonitor>) {
    let monitors: Vec<PinMonitor> = frequencies.iter().map(|_| PinMonitor::new()).collect();
    let tones = monitors
        .iter()
        .cloned()
        .zip(frequencies.iter().map(|&f| hz(f)))
        .collect();

    (tones, monitors)
}

/// Run `ticks` interrupts and record the cycles on which `monitor` changed level.
pub fn toggle_cycles<const N: usize>(
    scheduler: &TestScheduler<N>,
    monitor: &PinMonitor,
    ticks: u64,
) -> Vec<u64> {
    let mut toggles = Vec::new();
    let mut level = monitor.level();

    for _ in 0..ticks {
        scheduler.irq_handler();

        if monitor.level() != level {
            level = monitor.level();
            toggles.push(scheduler.cycle());
        }
    }

    toggles
}
