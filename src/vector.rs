//! Timer interrupt vector table.
//!
//! A hardware interrupt vector cannot carry a context pointer, so the timer
//! ISR looks up which scheduler owns the firing timer here. Entries are
//! back-references: the registry never owns a scheduler.

use core::cell::RefCell;
use critical_section::{CriticalSection, Mutex};

/// Upper bound on timer instances a chip may expose.
pub const MAX_TIMER_INSTANCES: usize = 8;

/// Receiver of compare-match interrupts for one timer index.
pub trait TimerInterrupt: Sync {
    fn on_timer_match(&self, index: usize);
}

type Slot = Option<&'static dyn TimerInterrupt>;

/// Why a timer index could not be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VectorError {
    /// Index beyond [`MAX_TIMER_INSTANCES`].
    OutOfRange,
    /// Index already routed to another handler.
    Occupied,
}

/// Maps a timer index to the scheduler that reserved it.
///
/// Declare one as a `static` and call [`IrqRegistry::dispatch`] from every
/// timer interrupt vector:
///
/// ```ignore
/// static VECTORS: IrqRegistry = IrqRegistry::new();
///
/// #[interrupt]
/// fn TC3() {
///     VECTORS.dispatch(3);
/// }
/// ```
pub struct IrqRegistry {
    slots: Mutex<RefCell<[Slot; MAX_TIMER_INSTANCES]>>,
}

impl IrqRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([None; MAX_TIMER_INSTANCES])),
        }
    }

    /// Route interrupts for `index` to `handler`.
    ///
    /// Fails if `index` is out of range or already routed to a different handler.
    pub fn register(
        &self,
        cs: CriticalSection<'_>,
        index: usize,
        handler: &'static dyn TimerInterrupt,
    ) -> Result<(), VectorError> {
        let mut slots = self.slots.borrow_ref_mut(cs);
        let slot = slots.get_mut(index).ok_or(VectorError::OutOfRange)?;

        match *slot {
            Some(existing)
                if !core::ptr::addr_eq(
                    existing as *const dyn TimerInterrupt,
                    handler as *const dyn TimerInterrupt,
                ) =>
            {
                Err(VectorError::Occupied)
            }
            _ => {
                *slot = Some(handler);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, cs: CriticalSection<'_>, index: usize) {
        if let Some(slot) = self.slots.borrow_ref_mut(cs).get_mut(index) {
            *slot = None;
        }
    }

    #[must_use]
    pub fn is_registered(&self, index: usize) -> bool {
        critical_section::with(|cs| {
            self.slots
                .borrow_ref(cs)
                .get(index)
                .is_some_and(Option::is_some)
        })
    }

    /// Interrupt entry point for timer `index`.
    pub fn dispatch(&self, index: usize) {
        let handler =
            critical_section::with(|cs| self.slots.borrow_ref(cs).get(index).copied().flatten());

        if let Some(handler) = handler {
            handler.on_timer_match(index);
        }
    }
}

impl Default for IrqRegistry {
    fn default() -> Self {
        Self::new()
    }
}
