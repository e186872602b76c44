//! Framebuffer size queries shared by the platform and GPU layers.

/// Size of a window's drawable area in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferSize {
    pub width: u32,
    pub height: u32,
}

impl FramebufferSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A window with either dimension at zero (usually minimized) cannot be presented to.
    pub const fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height, or 1.0 for a zero-sized framebuffer.
    pub fn aspect_ratio(self) -> f32 {
        if self.is_zero() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Something that can report its framebuffer size and process pending window events.
pub trait FramebufferSource {
    /// Current framebuffer size.
    fn framebuffer_size(&self) -> FramebufferSize;

    /// Process (or wait briefly for) pending window events so the size can change.
    fn pump_events(&self);

    /// Whether [`Self::pump_events`] delivers events itself.
    ///
    /// A window whose events arrive through an outer loop returns `false`;
    /// waiting on it from inside that loop would never see the size change.
    fn pumps_events(&self) -> bool {
        true
    }
}

/// Block until the source reports a non-zero framebuffer size.
///
/// Pumps events between queries; returns the first non-zero size observed.
pub fn wait_for_framebuffer(source: &(impl FramebufferSource + ?Sized)) -> FramebufferSize {
    let mut size = source.framebuffer_size();
    if size.is_zero() {
        tracing::debug!("Framebuffer is zero-sized, waiting for the window to be restored");
    }
    while size.is_zero() {
        source.pump_events();
        size = source.framebuffer_size();
    }
    size
}

/// The size to build presentation resources for, if there is one yet.
///
/// Waits for a non-zero size when the source pumps its own events. Otherwise
/// returns `None` while the window is zero-sized so the caller can retry once
/// the outer event loop reports a resize.
pub fn usable_framebuffer(source: &(impl FramebufferSource + ?Sized)) -> Option<FramebufferSize> {
    if source.pumps_events() {
        return Some(wait_for_framebuffer(source));
    }
    let size = source.framebuffer_size();
    (!size.is_zero()).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Replays a scripted sequence of sizes, advancing on every pump.
    struct ScriptedWindow {
        sizes: RefCell<VecDeque<FramebufferSize>>,
        pumps: Cell<usize>,
        external_loop: bool,
    }

    impl ScriptedWindow {
        fn new(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: RefCell::new(
                    sizes
                        .iter()
                        .map(|&(w, h)| FramebufferSize::new(w, h))
                        .collect(),
                ),
                pumps: Cell::new(0),
                external_loop: false,
            }
        }

        fn driven_externally(mut self) -> Self {
            self.external_loop = true;
            self
        }
    }

    impl FramebufferSource for ScriptedWindow {
        fn framebuffer_size(&self) -> FramebufferSize {
            self.sizes.borrow().front().copied().unwrap_or_default()
        }

        fn pump_events(&self) {
            self.pumps.set(self.pumps.get() + 1);
            let mut sizes = self.sizes.borrow_mut();
            if sizes.len() > 1 {
                sizes.pop_front();
            }
        }

        fn pumps_events(&self) -> bool {
            !self.external_loop
        }
    }

    #[test]
    fn returns_immediately_when_visible() {
        let window = ScriptedWindow::new(&[(800, 600)]);
        assert_eq!(wait_for_framebuffer(&window), FramebufferSize::new(800, 600));
        assert_eq!(window.pumps.get(), 0);
    }

    #[test]
    fn blocks_while_minimized() {
        let window = ScriptedWindow::new(&[(0, 0), (0, 0), (800, 0), (800, 600)]);
        assert_eq!(wait_for_framebuffer(&window), FramebufferSize::new(800, 600));
        assert_eq!(window.pumps.get(), 3);
    }

    #[test]
    fn usable_size_waits_when_the_source_pumps() {
        let window = ScriptedWindow::new(&[(0, 0), (640, 480)]);
        assert_eq!(
            usable_framebuffer(&window),
            Some(FramebufferSize::new(640, 480))
        );
        assert_eq!(window.pumps.get(), 1);
    }

    #[test]
    fn usable_size_never_blocks_an_outer_event_loop() {
        let window = ScriptedWindow::new(&[(0, 0), (640, 480)]).driven_externally();
        assert_eq!(usable_framebuffer(&window), None);
        assert_eq!(window.pumps.get(), 0);

        let window = ScriptedWindow::new(&[(1024, 768)]).driven_externally();
        assert_eq!(
            usable_framebuffer(&window),
            Some(FramebufferSize::new(1024, 768))
        );
    }

    #[test]
    fn zero_detection() {
        assert!(FramebufferSize::new(0, 600).is_zero());
        assert!(FramebufferSize::new(800, 0).is_zero());
        assert!(!FramebufferSize::new(1, 1).is_zero());
        assert_eq!(FramebufferSize::new(0, 0).aspect_ratio(), 1.0);
        assert_eq!(FramebufferSize::new(800, 400).aspect_ratio(), 2.0);
    }
}
