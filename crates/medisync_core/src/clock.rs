//! The logical sync clock.

use crate::error::CoreResult;
use crate::facts::{FactStore, FACT_CURRENT_TICK};
use crate::types::Tick;
use parking_lot::Mutex;
use std::sync::Arc;

/// Issues monotonically increasing ticks, durably backed by the fact store.
///
/// A tick is persisted before it is handed out: if the fact store is
/// unavailable the allocation fails and no tick is issued, so a tick can
/// never be reused after a restart.
///
/// Concurrent allocation is safe; the clock only needs atomic increment.
pub struct LogicalClock {
    facts: Arc<dyn FactStore>,
    // serializes advance_to against concurrent allocation
    guard: Mutex<()>,
}

impl LogicalClock {
    /// Creates a clock over the given fact store.
    pub fn new(facts: Arc<dyn FactStore>) -> Self {
        Self {
            facts,
            guard: Mutex::new(()),
        }
    }

    /// Allocates and durably persists the next tick.
    ///
    /// # Errors
    ///
    /// Fails if the durable sequence cannot be written; the caller must
    /// treat this as fatal for the mutation or session being stamped.
    pub fn next_tick(&self) -> CoreResult<Tick> {
        let _guard = self.guard.lock();
        let value = self.facts.increment(FACT_CURRENT_TICK, 1)?;
        Ok(Tick::new(value))
    }

    /// Allocates a consecutive (tick, tock) pair in one durable write.
    ///
    /// The lower value is handed to the requesting peer to stamp its writes
    /// for the session; the higher stamps local persistence of whatever that
    /// peer pushes. No two concurrent sessions can share either value.
    pub fn tick_pair(&self) -> CoreResult<(Tick, Tick)> {
        let _guard = self.guard.lock();
        let tock = self.facts.increment(FACT_CURRENT_TICK, 2)?;
        Ok((Tick::new(tock - 1), Tick::new(tock)))
    }

    /// Returns the highest tick issued or adopted so far.
    pub fn current_tick(&self) -> CoreResult<Tick> {
        Ok(self
            .facts
            .get_tick(FACT_CURRENT_TICK)?
            .unwrap_or(Tick::ZERO))
    }

    /// Adopts a peer-reported tick if it is ahead of the local clock.
    ///
    /// A no-op when `peer_tick` is not greater; ticks never move backward.
    pub fn advance_to(&self, peer_tick: Tick) -> CoreResult<()> {
        let _guard = self.guard.lock();
        let current = self
            .facts
            .get_tick(FACT_CURRENT_TICK)?
            .unwrap_or(Tick::ZERO);
        if peer_tick > current {
            self.facts.set_tick(FACT_CURRENT_TICK, peer_tick)?;
        }
        Ok(())
    }
}
