//! Per-frame bookkeeping: the frame descriptor, the slot ring and slot states.

use crate::error::{GpuError, Result};
use ash::vk;
use jetz_core::constants::FRAMES_IN_FLIGHT;

/// Whether a frame may be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was acquired; record and call `end_frame`.
    Ready,
    /// The swapchain was recreated during acquisition; skip this frame.
    Stale,
}

/// Produced by `begin_frame` and consumed by `end_frame`.
///
/// Index image-specific resources by `image_idx` and per-slot resources
/// (uniform buffers, descriptor sets) by `frame_idx`.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Frame slot used for synchronization.
    pub frame_idx: usize,
    /// Swapchain image returned by the presentation engine.
    pub image_idx: u32,
    pub status: FrameStatus,
    /// Seconds since the previous `begin_frame`.
    pub delta_time: f32,
    pub width: u32,
    pub height: u32,
    /// Primary command buffer, inside the primary render pass.
    pub command_buffer: vk::CommandBuffer,
    /// Picker command buffer, inside the picker render pass.
    pub picker_command_buffer: vk::CommandBuffer,
}

impl Frame {
    /// Whether rendering should be skipped.
    pub fn is_stale(&self) -> bool {
        self.status == FrameStatus::Stale
    }

    /// Framebuffer extent.
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Lifecycle of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

impl SlotState {
    /// Whether `self -> next` is a legal step.
    ///
    /// A slot may drop back to `Idle` from `Acquired` when the swapchain is
    /// recreated, and a new frame may start once the previous one was presented.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Idle | Presented, Acquired)
                | (Acquired, Recording | Idle)
                | (Recording, Submitted)
                | (Submitted, Presented)
                | (Presented, Idle)
        )
    }
}

/// Ring of frame slots with their lifecycle states.
#[derive(Debug, Clone)]
pub struct FrameRing {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameRing {
    /// Create a ring of `count` idle slots.
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![SlotState::Idle; count.max(1)],
            current: 0,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; a ring has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Slot the next `advance` will hand out.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Return the current slot and move to the next one.
    pub fn advance(&mut self) -> usize {
        let slot = self.current;
        self.current = (self.current + 1) % self.states.len();
        slot
    }

    /// State of `slot`.
    pub fn state(&self, slot: usize) -> Result<SlotState> {
        self.states
            .get(slot)
            .copied()
            .ok_or_else(|| GpuError::OutOfRange(format!("frame slot {slot}")))
    }

    /// Move `slot` to `next`, rejecting illegal steps.
    pub fn transition(&mut self, slot: usize, next: SlotState) -> Result<()> {
        let state = self
            .states
            .get_mut(slot)
            .ok_or_else(|| GpuError::OutOfRange(format!("frame slot {slot}")))?;

        if !state.can_transition_to(next) {
            return Err(GpuError::InvalidState(format!(
                "frame slot {slot}: {state:?} -> {next:?}"
            )));
        }
        *state = next;
        Ok(())
    }

    /// Whether any slot holds an acquired image that was not submitted yet.
    pub fn is_recording(&self) -> bool {
        self.states
            .iter()
            .any(|s| matches!(s, SlotState::Acquired | SlotState::Recording))
    }

    /// Put every slot back to `Idle`, after the device has drained.
    pub fn reset(&mut self) {
        self.states.fill(SlotState::Idle);
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new(FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_slots_cycle() {
        let mut ring = FrameRing::default();
        let visited: Vec<usize> = (0..5).map(|_| ring.advance()).collect();
        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn full_cycle_repeats() {
        let mut ring = FrameRing::new(3);
        let first: Vec<usize> = (0..3).map(|_| ring.advance()).collect();
        let second: Vec<usize> = (0..3).map(|_| ring.advance()).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn slot_lifecycle() {
        let mut ring = FrameRing::default();
        for next in [
            SlotState::Acquired,
            SlotState::Recording,
            SlotState::Submitted,
            SlotState::Presented,
            SlotState::Acquired,
        ] {
            ring.transition(0, next).unwrap();
        }
        assert_eq!(ring.state(0).unwrap(), SlotState::Acquired);
        assert_eq!(ring.state(1).unwrap(), SlotState::Idle);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut ring = FrameRing::default();
        assert!(matches!(
            ring.transition(0, SlotState::Submitted),
            Err(GpuError::InvalidState(_))
        ));
        assert!(matches!(
            ring.transition(5, SlotState::Acquired),
            Err(GpuError::OutOfRange(_))
        ));

        ring.transition(0, SlotState::Acquired).unwrap();
        ring.transition(0, SlotState::Recording).unwrap();
        assert!(ring.transition(0, SlotState::Presented).is_err());
        assert_eq!(ring.state(0).unwrap(), SlotState::Recording);
    }

    #[test]
    fn stale_acquire_returns_slot_to_idle() {
        let mut ring = FrameRing::default();
        ring.transition(1, SlotState::Acquired).unwrap();
        ring.transition(1, SlotState::Idle).unwrap();
        ring.transition(1, SlotState::Acquired).unwrap();

        assert!(ring.is_recording());

        ring.reset();
        assert_eq!(ring.state(1).unwrap(), SlotState::Idle);
        assert!(!ring.is_recording());
    }
}
