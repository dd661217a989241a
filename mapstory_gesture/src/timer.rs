// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Long-press → drag-tracking promotion timer.
//!
//! Each arm spawns a short-lived thread that waits on either the delay or a
//! cancel channel, then posts a [`PromotionTick`] carrying the gesture
//! generation it was armed for. Canceling drops the cancel sender, which wakes
//! the thread without a tick. A tick that was already in flight when the timer
//! was canceled or re-armed carries a stale generation and is refused by
//! [`PromotionTimer::accept`]; the interaction thread is the only writer of
//! gesture state, so the race is settled there.

use core::fmt;
use core::time::Duration;
use std::thread;

use crossbeam_channel::{Receiver, Sender, after, bounded, select, unbounded};

/// A promotion timer fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PromotionTick {
    /// Generation of the gesture the timer was armed for.
    pub generation: u64,
}

struct Pending {
    generation: u64,
    // Dropping this wakes the waiting thread without a tick.
    _cancel: Sender<()>,
}

/// Cancelable one-shot timer keyed by gesture generation.
pub struct PromotionTimer {
    ticks_tx: Sender<PromotionTick>,
    ticks_rx: Receiver<PromotionTick>,
    pending: Option<Pending>,
}

impl fmt::Debug for PromotionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromotionTimer")
            .field("armed", &self.armed_generation())
            .field("queued_ticks", &self.ticks_rx.len())
            .finish_non_exhaustive()
    }
}

impl Default for PromotionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromotionTimer {
    /// An idle timer.
    pub fn new() -> Self {
        let (ticks_tx, ticks_rx) = unbounded();
        Self {
            ticks_tx,
            ticks_rx,
            pending: None,
        }
    }

    /// Fire after `delay` for `generation`, replacing any armed timer.
    ///
    /// Returns `false` if the timer thread could not be started; the timer is
    /// then left disarmed.
    pub fn arm(&mut self, generation: u64, delay: Duration) -> bool {
        self.cancel();
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let ticks = self.ticks_tx.clone();
        let spawned = thread::Builder::new()
            .name("mapstory-promotion".to_owned())
            .spawn(move || {
                select! {
                    recv(cancel_rx) -> _ => {}
                    recv(after(delay)) -> _ => {
                        // The classifier may already be gone.
                        let _ = ticks.send(PromotionTick { generation });
                    }
                }
            });
        match spawned {
            Ok(_) => {
                self.pending = Some(Pending {
                    generation,
                    _cancel: cancel_tx,
                });
                true
            }
            Err(err) => {
                tracing::warn!(generation, error = %err, "failed to start promotion timer");
                false
            }
        }
    }

    /// Disarm. A tick already in flight will be refused by [`Self::accept`].
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::trace!(generation = pending.generation, "promotion timer canceled");
        }
    }

    /// Whether a timer is armed.
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Generation the armed timer will fire for.
    pub fn armed_generation(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.generation)
    }

    /// Channel the ticks arrive on, for hosts that `select!` over it.
    pub fn ticks(&self) -> &Receiver<PromotionTick> {
        &self.ticks_rx
    }

    /// Claim `tick` if it belongs to the armed timer, disarming it.
    pub fn accept(&mut self, tick: PromotionTick) -> bool {
        if self.armed_generation() == Some(tick.generation) {
            self.pending = None;
            true
        } else {
            tracing::debug!(
                generation = tick.generation,
                armed = ?self.armed_generation(),
                "ignoring stale promotion tick"
            );
            false
        }
    }
}
