use reel_core::EngineError;

use crate::gpu::{BufferHandle, BufferKind, Gpu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBuffers {
    pub vertex: BufferHandle,
    pub tex_coord: BufferHandle,
    pub index: BufferHandle,
}

/// Indexed triangle geometry: xyz positions in clip space, uv texture coordinates.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub vertices: Vec<f32>,
    pub tex_coords: Vec<f32>,
    pub indices: Vec<u16>,
    buffers: Option<ModelBuffers>,
}

impl Model {
    pub fn new(vertices: Vec<f32>, tex_coords: Vec<f32>, indices: Vec<u16>) -> Self {
        Self {
            vertices,
            tex_coords,
            indices,
            buffers: None,
        }
    }

    /// The full-viewport quad every node draws with by default.
    pub fn rectangle() -> Self {
        Self::new(
            vec![
                -1.0, -1.0, 0.0, //
                1.0, -1.0, 0.0, //
                1.0, 1.0, 0.0, //
                -1.0, 1.0, 0.0,
            ],
            vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn buffers(&self) -> Option<ModelBuffers> {
        self.buffers
    }

    /// Creates and fills the GPU buffers once. Later calls return the existing ones.
    pub fn upload(&mut self, gpu: &mut dyn Gpu) -> Result<ModelBuffers, EngineError> {
        if let Some(b) = self.buffers {
            return Ok(b);
        }
        let vertex = gpu.create_buffer(BufferKind::Vertex)?;
        gpu.buffer_f32(vertex, &self.vertices);
        let tex_coord = gpu.create_buffer(BufferKind::Vertex)?;
        gpu.buffer_f32(tex_coord, &self.tex_coords);
        let index = gpu.create_buffer(BufferKind::Index)?;
        gpu.buffer_u16(index, &self.indices);

        let b = ModelBuffers {
            vertex,
            tex_coord,
            index,
        };
        self.buffers = Some(b);
        Ok(b)
    }

    pub fn release(&mut self, gpu: &mut dyn Gpu) {
        if let Some(b) = self.buffers.take() {
            gpu.delete_buffer(b.vertex);
            gpu.delete_buffer(b.tex_coord);
            gpu.delete_buffer(b.index);
        }
    }

    pub fn forget(&mut self) {
        self.buffers = None;
    }
}
