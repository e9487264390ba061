// =============================================================================
// VK-INFLIGHT DEMO - Spinning lit cubes
// =============================================================================
//
// Opens a window, hands its raw handles to the renderer and drives frames
// from the winit event loop.
//
// LOOP:
// 1. window_event translates winit events into EngineEvents and queues them
// 2. about_to_wait drains the queue (resize, quit) and requests a redraw
// 3. RedrawRequested: frame_start → queue draws → frame_end
//
// =============================================================================

use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use vk_inflight::{Config, EngineEvent, EventQueue, EventResponse, Light, MeshHandle, Renderer};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::PhysicalKey,
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vk-inflight demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally piped into the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Cubes drawn each frame: (mesh, offset, spin axis)
struct DemoScene {
    cubes: Vec<(MeshHandle, Vec3, Vec3)>,
    started: Instant,
}

pub struct App {
    config: Config,
    // Dropped before the window it renders into
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    scene: Option<DemoScene>,
    events: EventQueue,
    fatal: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    is_fullscreen: bool,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            scene: None,
            events: EventQueue::new(),
            fatal: None,
            is_fullscreen,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let display = window.display_handle().context("Failed to get display handle")?.as_raw();
        let handle = window.window_handle().context("Failed to get window handle")?.as_raw();
        let size = window.inner_size();

        // The window is kept in `self.window` until after the renderer is dropped
        let mut renderer = unsafe { Renderer::new(&self.config, display, handle, (size.width, size.height))? };

        let colors = [[0.9, 0.3, 0.2], [0.2, 0.8, 0.3], [0.2, 0.4, 0.9]];
        let mut cubes = Vec::with_capacity(colors.len());
        for (i, color) in colors.into_iter().enumerate() {
            let mesh = renderer.create_cube(color)?;
            let offset = Vec3::new((i as f32 - 1.0) * 1.8, 0.0, 0.0);
            let axis = Vec3::new(0.3 + i as f32 * 0.2, 1.0, 0.1 * i as f32).normalize();
            cubes.push((mesh, offset, axis));
        }

        self.scene = Some(DemoScene {
            cubes,
            started: Instant::now(),
        });
        self.renderer = Some(renderer);
        Ok(())
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    fn render_frame(&mut self) -> Result<bool> {
        let (Some(renderer), Some(scene)) = (self.renderer.as_mut(), self.scene.as_ref()) else {
            return Ok(false);
        };

        if !renderer.frame_start()? {
            return Ok(false);
        }

        let extent = renderer.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        renderer.set_camera(view, proj);

        renderer.add_light(Light::directional(Vec3::new(-0.4, -1.0, -0.6), Vec3::ONE, 0.8));
        renderer.add_light(Light::point(Vec3::new(0.0, 2.5, 2.0), Vec3::new(1.0, 0.9, 0.7), 4.0));

        let t = scene.started.elapsed().as_secs_f32();
        for &(mesh, offset, axis) in &scene.cubes {
            let transform = Mat4::from_rotation_translation(Quat::from_axis_angle(axis, t), offset);
            renderer.draw(mesh, transform);
        }

        renderer.frame_end()?;
        Ok(true)
    }

    /// Apply queued events; returns false once the app should exit.
    fn process_events(&mut self) -> bool {
        let events: Vec<EngineEvent> = self.events.drain().collect();
        for event in events {
            if let EngineEvent::KeyPressed { key } = &event {
                if key.eq_ignore_ascii_case(&self.config.controls.fullscreen_key) {
                    self.toggle_fullscreen();
                    continue;
                }
            }

            let response = match self.renderer.as_mut() {
                Some(renderer) => renderer.handle_event(&event),
                None if event == EngineEvent::CloseRequested => EventResponse::Quit,
                None => EventResponse::Continue,
            };
            if response == EventResponse::Quit {
                log::info!("{:?}, shutting down...", event);
                return false;
            }
        }
        true
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The resulting Resized event rebuilds the swapchain
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let frames_in_flight = self.renderer.as_ref().map_or(0, Renderer::frames_in_flight);
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} in flight]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    frames_in_flight
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.cleanup();
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fatal = Some(anyhow::Error::new(e).context("Failed to create window"));
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Translate window events; they are applied in about_to_wait.
    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.events.push(EngineEvent::CloseRequested),

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.events.push(EngineEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        self.events.push(EngineEvent::KeyPressed {
                            key: format!("{:?}", code),
                        });
                    }
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:#}", e);
                    self.fatal = Some(e);
                    self.shutdown(event_loop);
                }
            },

            _ => {}
        }
    }

    /// Apply queued events, then keep redrawing continuously.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if !self.process_events() {
            self.shutdown(event_loop);
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        // Renderer before window
        if let Some(mut renderer) = self.renderer.take() {
            renderer.cleanup();
        }
        self.window = None;
        log::info!("Cleanup complete");
    }
}
