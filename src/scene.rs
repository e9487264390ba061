// Scene - per-frame draw set
//
// Callers queue mesh instances and lights between frame_start and frame_end;
// the renderer packs them into the GPU layouts below while recording and
// then clears the list. Camera matrices persist across frames.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};

/// Lights beyond this are dropped when packing the scene uniform.
pub const MAX_LIGHTS: usize = 8;

/// Index of a mesh uploaded through `Renderer::create_mesh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRenderInstance {
    pub mesh: MeshHandle,
    pub transform: Mat4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    /// Direction the light travels for directional lights, world position for point lights.
    pub position_or_direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            position_or_direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position_or_direction: position,
            color,
            intensity,
        }
    }

    fn to_gpu(self) -> GpuLight {
        let w = match self.kind {
            LightKind::Directional => 0.0,
            LightKind::Point => 1.0,
        };
        GpuLight {
            position: self.position_or_direction.extend(w).to_array(),
            color: self.color.extend(self.intensity).to_array(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GPU layouts (std140 / push constant)
// ─────────────────────────────────────────────────────────────────────────────

/// xyz = position or direction, w = 1 for point lights, 0 for directional.
/// color.w carries intensity.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

/// Binding 0 of the scene descriptor set. Mirrors `Scene` in mesh.vert/mesh.frag.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub ambient: [f32; 4],
    /// x = number of valid entries in `lights`.
    pub light_count: [u32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl MeshPushConstants {
    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal: model.inverse().transpose().to_cols_array_2d(),
        }
    }

    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<Self>() as u32,
        }
    }
}

/// Interleaved position + normal + colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let attribute = |location, offset| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset as u32,
        };
        [
            attribute(0, offset_of!(Vertex, position)),
            attribute(1, offset_of!(Vertex, normal)),
            attribute(2, offset_of!(Vertex, color)),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Draw list
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DrawList {
    instances: Vec<MeshRenderInstance>,
    lights: Vec<Light>,
    view: Mat4,
    proj: Mat4,
    ambient: Vec3,
}

impl Default for DrawList {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            lights: Vec::new(),
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            ambient: Vec3::splat(0.1),
        }
    }
}

impl DrawList {
    pub fn push(&mut self, mesh: MeshHandle, transform: Mat4) {
        self.instances.push(MeshRenderInstance { mesh, transform });
    }

    pub fn add_light(&mut self, light: Light) {
        if self.lights.len() == MAX_LIGHTS {
            log::warn!("More than {} lights queued this frame; extra lights are ignored", MAX_LIGHTS);
        }
        self.lights.push(light);
    }

    pub fn set_camera(&mut self, view: Mat4, proj: Mat4) {
        self.view = view;
        self.proj = proj;
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.ambient = ambient;
    }

    pub fn instances(&self) -> &[MeshRenderInstance] {
        &self.instances
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn scene_uniform(&self) -> SceneUniform {
        let mut lights = [GpuLight::default(); MAX_LIGHTS];
        let count = self.lights.len().min(MAX_LIGHTS);
        for (slot, light) in lights.iter_mut().zip(&self.lights) {
            *slot = light.to_gpu();
        }

        SceneUniform {
            view: self.view.to_cols_array_2d(),
            proj: self.proj.to_cols_array_2d(),
            ambient: self.ambient.extend(1.0).to_array(),
            light_count: [count as u32, 0, 0, 0],
            lights,
        }
    }

    /// Drop this frame's instances and lights; camera and ambient stay.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.lights.clear();
    }
}

/// Unit cube centred on the origin with per-face normals, counter-clockwise
/// winding seen from outside.
pub fn cube(color: [f32; 3]) -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis) per face, u x v = normal
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v) in FACES {
        let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = (n + u * su + v * sv) * 0.5;
            vertices.push(Vertex {
                position: position.to_array(),
                normal,
                color,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}
