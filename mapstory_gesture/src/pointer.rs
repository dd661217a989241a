// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw pointer input.

use core::num::NonZeroU64;
use std::time::Instant;

use kurbo::Point;

/// Pointer identifier for tracking concurrent touches.
pub type PointerId = NonZeroU64;

/// Phase of a raw pointer event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerPhase {
    /// Contact began.
    Down,
    /// Contact moved.
    Move,
    /// Contact ended.
    Up,
    /// The platform took the pointer away.
    Cancel,
}

/// One raw pointer event in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    /// Which contact.
    pub pointer: PointerId,
    /// What happened.
    pub phase: PointerPhase,
    /// Where, in screen pixels.
    pub position: Point,
    /// When.
    pub time: Instant,
}

impl PointerEvent {
    /// A [`PointerPhase::Down`] event.
    pub fn down(pointer: PointerId, position: Point, time: Instant) -> Self {
        Self {
            pointer,
            phase: PointerPhase::Down,
            position,
            time,
        }
    }

    /// A [`PointerPhase::Move`] event.
    pub fn moved(pointer: PointerId, position: Point, time: Instant) -> Self {
        Self {
            phase: PointerPhase::Move,
            ..Self::down(pointer, position, time)
        }
    }

    /// A [`PointerPhase::Up`] event.
    pub fn up(pointer: PointerId, position: Point, time: Instant) -> Self {
        Self {
            phase: PointerPhase::Up,
            ..Self::down(pointer, position, time)
        }
    }

    /// A [`PointerPhase::Cancel`] event.
    pub fn cancel(pointer: PointerId, position: Point, time: Instant) -> Self {
        Self {
            phase: PointerPhase::Cancel,
            ..Self::down(pointer, position, time)
        }
    }
}
