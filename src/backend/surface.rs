// Platform surface creation
//
// Turns raw-window-handle handles into a VkSurfaceKHR without going
// through a windowing-specific helper crate.

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

use crate::error::EngineError;

/// Instance extensions needed to present on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>, EngineError> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => return Err(EngineError::UnsupportedPlatform(format!("{:?}", other))),
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// Create a surface for the window.
///
/// # Safety
/// The handles must refer to a live window that outlives the surface.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .ok_or_else(|| EngineError::UnsupportedPlatform("Xlib display without connection".into()))?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(window.window as vk::Window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .map(|c| c.as_ptr())
                .ok_or_else(|| EngineError::UnsupportedPlatform("XCB display without connection".into()))?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut vk::xcb_connection_t)
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut vk::wl_display)
                .surface(window.surface.as_ptr() as *mut vk::wl_surface);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)?
        }
        (display, _) => {
            return Err(EngineError::UnsupportedPlatform(format!("{:?}", display)).into());
        }
    };

    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, XlibDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn xlib_needs_surface_and_xlib_extensions() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let exts = required_extensions(display).unwrap();
        assert_eq!(exts, vec![khr::Surface::name(), khr::XlibSurface::name()]);
    }

    #[test]
    fn wayland_needs_wayland_extension() {
        let mut dummy = 0u8;
        let ptr = NonNull::from(&mut dummy).cast();
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(ptr));
        let exts = required_extensions(display).unwrap();
        assert!(exts.contains(&khr::WaylandSurface::name()));
    }
}
