//! The viewer application.

use glam::Vec3;
use jetz_app::{AppContext, Frame, FrameContext, JetzApp, RenderBackend, WindowEvent};
use jetz_core::FramebufferSize;
use jetz_gpu::{Buffer, BufferKind, MemoryUsage, PerViewSet, PerViewUbo};
use tracing::info;
use winit::event::{ElementState, MouseButton};

/// Triangle corners, uploaded once to device-local memory.
const TRIANGLE: [[f32; 3]; 3] = [[0.0, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]];

const ORBIT_RADIUS: f32 = 4.0;
const ORBIT_SPEED: f32 = 0.5;

/// Position of a camera circling the origin at `angle` radians.
pub fn orbit_position(angle: f32) -> Vec3 {
    Vec3::new(angle.cos() * ORBIT_RADIUS, 1.5, angle.sin() * ORBIT_RADIUS)
}

pub struct Viewer {
    view: PerViewSet,
    // Kept alive for the lifetime of the app
    _vertices: Buffer,
    angle: f32,
    cursor: Option<(u32, u32)>,
    pick_requested: bool,
}

impl JetzApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let data: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertices = ctx.backend.create_buffer(
            data.len() as u64,
            BufferKind::Vertex,
            MemoryUsage::GpuOnly,
        )?;
        ctx.backend.update_buffer(&vertices, 0, data)?;
        info!("Uploaded {} bytes of vertex data", data.len());

        let view = PerViewSet::new(ctx.device())?;

        Ok(Self {
            view,
            _vertices: vertices,
            angle: 0.0,
            cursor: None,
            pick_requested: false,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.angle = (self.angle + dt * ORBIT_SPEED) % std::f32::consts::TAU;
    }

    fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let position = orbit_position(self.angle);
        let ubo = PerViewUbo::new(
            position,
            -position,
            Vec3::Y,
            FramebufferSize::new(frame.frame.width, frame.frame.height),
        );
        self.view.update(frame.frame_idx(), &ubo)?;
        Ok(())
    }

    fn on_frame_presented(&mut self, ctx: &AppContext, frame: &Frame) -> anyhow::Result<()> {
        if !std::mem::take(&mut self.pick_requested) {
            return Ok(());
        }
        let Some((x, y)) = self.cursor else {
            return Ok(());
        };

        match ctx.backend.read_picker_id(frame, x, y)? {
            Some(id) => info!("Picked object {id} at ({x}, {y})"),
            None => info!("Nothing under the cursor at ({x}, {y})"),
        }
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x >= 0.0 && position.y >= 0.0)
                    .then(|| (position.x as u32, position.y as u32));
                false
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                false
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                self.pick_requested = true;
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        info!("Viewer shutting down after {} frames", ctx.frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_keeps_a_fixed_distance() {
        for step in 0..8 {
            let position = orbit_position(step as f32 * 0.8);
            let horizontal = Vec3::new(position.x, 0.0, position.z).length();
            assert!((horizontal - ORBIT_RADIUS).abs() < 1e-4);
        }
    }
}
