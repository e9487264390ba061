// Frame orchestration
//
// F frame slots rotate round-robin, each with its own fence and semaphore
// pair. The slot index is independent of the swapchain image index handed
// back by acquire. Image ownership is tracked so a per-image command buffer
// is never re-recorded while another slot's submission still reads it.
//
// The Vulkan calls sit behind `FrameBackend` so the ordering can be
// exercised without a device.

use anyhow::Result;

use crate::backend::swapchain::{Acquired, PresentStatus};
use crate::error::EngineError;
use crate::events::EngineEvent;

/// The per-frame GPU operations, addressed by slot and image index.
pub trait FrameBackend {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()>;
    fn reset_fence(&mut self, slot: usize) -> Result<()>;
    /// Acquire the next image, signalling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    /// Submit image's command buffer, signalling the slot's fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    WaitingOnFence,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// A frame between `begin_frame` and `end_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pub slot: usize,
    pub image_index: u32,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    Ready(FrameToken),
    /// Swapchain must be recreated; no fence was reset.
    OutOfDate,
}

pub struct FrameCycle {
    frames_in_flight: usize,
    current: usize,
    states: Vec<SlotState>,
    images_in_flight: Vec<Option<usize>>,
    in_progress: Option<FrameToken>,
}

impl FrameCycle {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frames_in_flight,
            // First advance lands on slot 0
            current: frames_in_flight - 1,
            states: vec![SlotState::Idle; frames_in_flight],
            images_in_flight: vec![None; image_count],
            in_progress: None,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn in_progress(&self) -> Option<FrameToken> {
        self.in_progress
    }

    /// Slot whose submission last used `image_index`, if any.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.images_in_flight.get(image_index as usize).copied().flatten()
    }

    pub fn begin_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<BeginOutcome> {
        if self.in_progress.is_some() {
            return Err(EngineError::FrameOrder("frame started twice without ending").into());
        }

        let slot = (self.current + 1) % self.frames_in_flight;
        self.current = slot;

        self.states[slot] = SlotState::WaitingOnFence;
        backend.wait_for_fence(slot)?;

        self.states[slot] = SlotState::Acquiring;
        let (image_index, suboptimal) = match backend.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                // Fence stays signalled so the next wait on this slot returns
                self.states[slot] = SlotState::Idle;
                return Ok(BeginOutcome::OutOfDate);
            }
        };

        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }
        if let Some(owner) = self.images_in_flight[image] {
            if owner != slot {
                backend.wait_for_fence(owner)?;
            }
        }
        self.images_in_flight[image] = Some(slot);

        backend.reset_fence(slot)?;

        self.states[slot] = SlotState::Recording;
        let token = FrameToken {
            slot,
            image_index,
            suboptimal,
        };
        self.in_progress = Some(token);
        Ok(BeginOutcome::Ready(token))
    }

    pub fn end_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B, token: FrameToken) -> Result<PresentStatus> {
        if self.in_progress != Some(token) {
            return Err(EngineError::FrameOrder("frame ended without a matching start").into());
        }
        self.in_progress = None;
        let FrameToken { slot, image_index, .. } = token;

        let result = Self::submit_and_present(backend, slot, image_index, &mut self.states[slot]);
        self.states[slot] = SlotState::Idle;
        let status = result?;
        Ok(if token.suboptimal && status == PresentStatus::Optimal {
            PresentStatus::Suboptimal
        } else {
            status
        })
    }

    fn submit_and_present<B: FrameBackend + ?Sized>(
        backend: &mut B,
        slot: usize,
        image_index: u32,
        state: &mut SlotState,
    ) -> Result<PresentStatus> {
        backend.record(slot, image_index)?;
        backend.submit(slot, image_index)?;
        *state = SlotState::Submitted;
        log::trace!("Slot {} submitted image {}", slot, image_index);

        *state = SlotState::Presenting;
        backend.present(slot, image_index)
    }

    /// Forget image ownership after the swapchain was rebuilt with `image_count`
    /// images. The device must be idle.
    pub fn resize_images(&mut self, image_count: usize) -> Result<()> {
        if self.in_progress.is_some() {
            return Err(EngineError::FrameOrder("swapchain rebuilt mid-frame").into());
        }
        self.images_in_flight = vec![None; image_count];
        Ok(())
    }
}

/// Whether the swapchain still matches the window. Resizes, out-of-date
/// acquires and non-optimal presents mark it stale; a zero-sized framebuffer
/// suspends rendering (and recreation) until the next non-zero resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainState {
    framebuffer_size: (u32, u32),
    minimized: bool,
    stale: bool,
}

impl SwapchainState {
    pub fn new(framebuffer_size: (u32, u32)) -> Self {
        Self {
            framebuffer_size,
            minimized: framebuffer_size.0 == 0 || framebuffer_size.1 == 0,
            stale: false,
        }
    }

    pub fn on_event(&mut self, event: &EngineEvent) {
        if let EngineEvent::Resized { width, height } = *event {
            self.framebuffer_size = (width, height);
            self.minimized = event.is_minimized_resize();
            if self.minimized {
                log::debug!("Window minimized, skipping frames");
            } else {
                self.stale = true;
            }
        }
    }

    pub fn on_acquire(&mut self, outcome: &BeginOutcome) {
        if *outcome == BeginOutcome::OutOfDate {
            log::debug!("Swapchain out of date on acquire");
            self.stale = true;
        }
    }

    pub fn on_present(&mut self, status: PresentStatus) {
        if status.needs_recreate() {
            log::debug!("Present reported {:?}", status);
            self.stale = true;
        }
    }

    /// Nothing is rendered while minimized.
    pub fn should_render(&self) -> bool {
        !self.minimized
    }

    pub fn should_recreate(&self) -> bool {
        self.stale && !self.minimized
    }

    /// Called once the swapchain was rebuilt at `framebuffer_size`.
    pub fn recreated(&mut self) {
        self.stale = false;
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fence {
        Signalled,
        Unsignalled,
        Pending,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
    }

    /// Models fences the way the driver would: waiting on an unsignalled fence
    /// with nothing submitted never returns, so it panics here.
    struct MockBackend {
        fences: Vec<Fence>,
        script: VecDeque<Acquired>,
        calls: Vec<Call>,
        present: PresentStatus,
    }

    impl MockBackend {
        fn new(slots: usize, script: impl IntoIterator<Item = Acquired>) -> Self {
            Self {
                fences: vec![Fence::Signalled; slots],
                script: script.into_iter().collect(),
                calls: Vec::new(),
                present: PresentStatus::Optimal,
            }
        }

        fn images(slots: usize, indices: &[u32]) -> Self {
            Self::new(
                slots,
                indices.iter().map(|&index| Acquired::Image { index, suboptimal: false }),
            )
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            match self.fences[slot] {
                Fence::Unsignalled => panic!("deadlock: waiting on unsignalled fence {slot}"),
                Fence::Pending => self.fences[slot] = Fence::Signalled,
                Fence::Signalled => {}
            }
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert_eq!(self.fences[slot], Fence::Signalled, "reset of in-flight fence {slot}");
            self.fences[slot] = Fence::Unsignalled;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquired> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.script.pop_front().expect("acquire script exhausted"))
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            assert_eq!(self.fences[slot], Fence::Unsignalled, "fence {slot} reused without reset");
            self.fences[slot] = Fence::Pending;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentStatus> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present)
        }
    }

    fn run_frame(cycle: &mut FrameCycle, backend: &mut MockBackend) -> Option<FrameToken> {
        match cycle.begin_frame(backend).unwrap() {
            BeginOutcome::Ready(token) => {
                cycle.end_frame(backend, token).unwrap();
                Some(token)
            }
            BeginOutcome::OutOfDate => None,
        }
    }

    #[test]
    fn slots_rotate_round_robin() {
        let mut cycle = FrameCycle::new(2, 3);
        let mut backend = MockBackend::images(2, &[0, 1, 2, 0, 1]);
        let slots: Vec<usize> = (0..5).map(|_| run_frame(&mut cycle, &mut backend).unwrap().slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn every_submission_follows_wait_and_reset_of_its_fence() {
        let mut cycle = FrameCycle::new(2, 3);
        let indices: Vec<u32> = (0..12).map(|i| i % 3).collect();
        let mut backend = MockBackend::images(2, &indices);
        for _ in 0..12 {
            run_frame(&mut cycle, &mut backend).unwrap();
        }

        // The mock panics on misuse; also check ordering explicitly
        for (pos, call) in backend.calls.iter().enumerate() {
            if let Call::Submit(slot, _) = *call {
                let before = &backend.calls[..pos];
                let reset = before.iter().rposition(|&c| c == Call::Reset(slot)).unwrap();
                let wait = before[..reset].iter().rposition(|&c| c == Call::Wait(slot)).unwrap();
                assert!(wait < reset);
            }
        }
    }

    #[test]
    fn slot_and_image_index_are_independent() {
        let mut cycle = FrameCycle::new(2, 3);
        let mut backend = MockBackend::images(2, &[0, 2]);
        run_frame(&mut cycle, &mut backend).unwrap();
        let token = run_frame(&mut cycle, &mut backend).unwrap();

        assert_eq!(token.slot, 1);
        assert_eq!(token.image_index, 2);
        assert!(backend.calls.contains(&Call::Record(1, 2)));
        assert!(backend.calls.contains(&Call::Submit(1, 2)));
        assert!(backend.calls.contains(&Call::Present(1, 2)));
        assert_eq!(cycle.image_owner(2), Some(1));
    }

    #[test]
    fn image_still_owned_by_other_slot_waits_on_its_fence() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::images(2, &[0, 0]);
        run_frame(&mut cycle, &mut backend).unwrap();
        backend.calls.clear();
        run_frame(&mut cycle, &mut backend).unwrap();

        assert_eq!(
            &backend.calls[..4],
            &[Call::Wait(1), Call::Acquire(1), Call::Wait(0), Call::Reset(1)]
        );
        assert_eq!(cycle.image_owner(0), Some(1));
    }

    #[test]
    fn out_of_date_acquire_leaves_fence_signalled() {
        let mut cycle = FrameCycle::new(1, 2);
        let mut backend = MockBackend::new(
            1,
            [
                Acquired::OutOfDate,
                Acquired::Image { index: 0, suboptimal: false },
            ],
        );

        assert_eq!(cycle.begin_frame(&mut backend).unwrap(), BeginOutcome::OutOfDate);
        assert!(!backend.calls.contains(&Call::Reset(0)));
        assert_eq!(cycle.slot_state(0), SlotState::Idle);
        assert_eq!(cycle.in_progress(), None);

        cycle.resize_images(3).unwrap();
        // Would panic in the mock if the fence had been reset
        let token = run_frame(&mut cycle, &mut backend).unwrap();
        assert_eq!(token.slot, 0);
    }

    #[test]
    fn suboptimal_acquire_is_reported_at_end_of_frame() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::new(2, [Acquired::Image { index: 1, suboptimal: true }]);
        let BeginOutcome::Ready(token) = cycle.begin_frame(&mut backend).unwrap() else {
            panic!("expected an image");
        };
        assert!(token.suboptimal);
        assert_eq!(cycle.end_frame(&mut backend, token).unwrap(), PresentStatus::Suboptimal);
    }

    #[test]
    fn out_of_date_present_is_passed_through() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::images(2, &[0]);
        backend.present = PresentStatus::OutOfDate;
        let BeginOutcome::Ready(token) = cycle.begin_frame(&mut backend).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(cycle.end_frame(&mut backend, token).unwrap(), PresentStatus::OutOfDate);
        assert_eq!(cycle.slot_state(0), SlotState::Idle);
    }

    #[test]
    fn slot_is_recording_between_begin_and_end() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::images(2, &[0]);
        let BeginOutcome::Ready(token) = cycle.begin_frame(&mut backend).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(cycle.slot_state(0), SlotState::Recording);
        cycle.end_frame(&mut backend, token).unwrap();
        assert_eq!(cycle.slot_state(0), SlotState::Idle);
    }

    #[test]
    fn misordered_calls_are_rejected() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::images(2, &[0, 1]);
        let stray = FrameToken {
            slot: 0,
            image_index: 0,
            suboptimal: false,
        };
        let err = cycle.end_frame(&mut backend, stray).unwrap_err();
        assert!(crate::error::is_engine_error(&err, |e| matches!(e, EngineError::FrameOrder(_))));

        let BeginOutcome::Ready(_) = cycle.begin_frame(&mut backend).unwrap() else {
            panic!("expected an image");
        };
        assert!(cycle.begin_frame(&mut backend).is_err());
        assert!(cycle.resize_images(2).is_err());
    }

    #[test]
    fn resize_forgets_image_ownership() {
        let mut cycle = FrameCycle::new(2, 2);
        let mut backend = MockBackend::images(2, &[1]);
        run_frame(&mut cycle, &mut backend).unwrap();
        assert_eq!(cycle.image_owner(1), Some(0));
        cycle.resize_images(4).unwrap();
        assert_eq!(cycle.image_owner(1), None);
        assert_eq!(cycle.image_owner(3), None);
    }

    #[test]
    fn zero_frames_in_flight_means_one() {
        let cycle = FrameCycle::new(0, 2);
        assert_eq!(cycle.frames_in_flight(), 1);
    }

    /// Drives one frame_start/frame_end pair the way the renderer does.
    /// Returns whether a frame was presented.
    fn drive(
        state: &mut SwapchainState,
        cycle: &mut FrameCycle,
        backend: &mut MockBackend,
        recreations: &mut Vec<(u32, u32)>,
    ) -> bool {
        if !state.should_render() {
            return false;
        }
        if state.should_recreate() {
            recreations.push(state.framebuffer_size());
            cycle.resize_images(3).unwrap();
            state.recreated();
        }
        let outcome = cycle.begin_frame(backend).unwrap();
        state.on_acquire(&outcome);
        match outcome {
            BeginOutcome::Ready(token) => {
                let status = cycle.end_frame(backend, token).unwrap();
                state.on_present(status);
                true
            }
            BeginOutcome::OutOfDate => false,
        }
    }

    #[test]
    fn minimize_then_resize_recreates_once_and_resumes() {
        let mut state = SwapchainState::new((1280, 720));
        let mut cycle = FrameCycle::new(2, 3);
        let mut backend = MockBackend::images(2, &[0, 1, 2]);
        let mut recreations = Vec::new();

        state.on_event(&EngineEvent::Resized { width: 1024, height: 768 });
        state.on_event(&EngineEvent::Resized { width: 0, height: 0 });
        assert!(state.is_minimized());
        assert!(!state.should_recreate());

        // Minimized frames touch neither the swapchain nor the backend
        assert!(!drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert!(!drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert!(backend.calls.is_empty());
        assert!(recreations.is_empty());

        state.on_event(&EngineEvent::Resized { width: 800, height: 600 });
        assert!(state.should_recreate());
        assert!(drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert_eq!(recreations, vec![(800, 600)]);
        assert!(!state.is_stale());

        assert!(drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert_eq!(recreations.len(), 1);
    }

    #[test]
    fn out_of_date_acquire_recreates_before_next_frame() {
        let mut state = SwapchainState::new((800, 600));
        let mut cycle = FrameCycle::new(2, 3);
        let mut backend = MockBackend::new(
            2,
            [
                Acquired::OutOfDate,
                Acquired::Image { index: 1, suboptimal: false },
            ],
        );
        let mut recreations = Vec::new();

        assert!(!drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert!(state.should_recreate());

        assert!(drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert_eq!(recreations, vec![(800, 600)]);
        assert!(!state.should_recreate());
    }

    #[test]
    fn suboptimal_present_marks_swapchain_stale() {
        let mut state = SwapchainState::new((800, 600));
        let mut cycle = FrameCycle::new(2, 3);
        let mut backend = MockBackend::images(2, &[0]);
        backend.present = PresentStatus::Suboptimal;
        let mut recreations = Vec::new();

        assert!(drive(&mut state, &mut cycle, &mut backend, &mut recreations));
        assert!(state.should_recreate());
    }

    #[test]
    fn starting_minimized_skips_until_resized() {
        let mut state = SwapchainState::new((0, 720));
        assert!(!state.should_render());
        state.on_event(&EngineEvent::KeyPressed { key: "Space".into() });
        assert!(!state.should_render());
        state.on_event(&EngineEvent::Resized { width: 640, height: 480 });
        assert!(state.should_render());
        assert!(state.should_recreate());
        assert_eq!(state.framebuffer_size(), (640, 480));
    }
}
