//! SPIR-V loading and shader modules.

use crate::device::Device;
use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

fn shader_error(path: &Path, reason: impl Into<String>) -> GpuError {
    GpuError::ShaderLoad {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Decode SPIR-V words from raw bytes.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(shader_error(path, "file is empty"));
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| shader_error(path, e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(shader_error(path, "missing SPIR-V magic number")),
    }
}

/// Read a compiled shader from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| shader_error(path, e.to_string()))?;
    parse_spirv(path, &bytes)
}

/// A shader module, destroyed on drop.
pub struct ShaderModule {
    device: Arc<Device>,
    handle: vk::ShaderModule,
    path: PathBuf,
}

impl ShaderModule {
    /// Create a module from SPIR-V words.
    pub fn new(device: &Arc<Device>, code: &[u32], path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let handle = unsafe { device.raw().create_shader_module(&create_info, None) }
            .map_err(|e| shader_error(&path, e.to_string()))?;

        Ok(Self {
            device: Arc::clone(device),
            handle,
            path,
        })
    }

    /// Load a compiled shader from disk and create a module for it.
    pub fn from_file(device: &Arc<Device>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let code = load_spirv(path)?;
        tracing::debug!("Loaded shader {} ({} words)", path.display(), code.len());
        Self::new(device, &code, path)
    }

    /// Get the raw module handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    /// File the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
    }
}
