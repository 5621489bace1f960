//! Shader bytecode loading
//!
//! Compiled shaders are read as `<shader_dir>/<name>.spv`. A missing or
//! malformed file fails the render state that asked for it.

use std::path::{Path, PathBuf};

use crate::render::device::{GpuDevice, GpuHandle};
use crate::render::{RenderError, RenderResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Locates and loads compiled shader binaries
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    dir: PathBuf,
}

impl ShaderLibrary {
    /// Library reading from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory shaders are read from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the binary for shader `name`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.spv"))
    }

    /// Read and validate the SPIR-V words of shader `name`
    pub fn load(&self, name: &str) -> RenderResult<Vec<u32>> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path).map_err(|source| RenderError::ShaderLoad {
            path: path.clone(),
            source,
        })?;
        spirv_words(&bytes).map_err(|reason| RenderError::InitializationFailed(format!("{}: {reason}", path.display())))
    }

    /// Create the vertex and fragment modules of a pipeline.
    ///
    /// Nothing is left alive if either stage fails.
    pub fn create_stages(
        &self,
        device: &mut dyn GpuDevice,
        vertex: &str,
        fragment: &str,
    ) -> RenderResult<(GpuHandle, GpuHandle)> {
        let vertex_module = device.create_shader_module(&self.load(vertex)?)?;
        let fragment_module = self
            .load(fragment)
            .and_then(|words| device.create_shader_module(&words));
        match fragment_module {
            Ok(fragment_module) => Ok((vertex_module, fragment_module)),
            Err(e) => {
                device.destroy(vertex_module);
                Err(e)
            }
        }
    }
}

/// Reinterpret little-endian SPIR-V bytes as words
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!("{} bytes is not a whole number of SPIR-V words", bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(format!("bad SPIR-V magic {:#010x}", words[0]));
    }
    Ok(words)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;

    /// Shader directory populated with minimal valid binaries for every
    /// pipeline the render states build.
    pub(crate) fn fixture_library(tag: &str) -> ShaderLibrary {
        let dir = std::env::temp_dir().join(format!("sample_renderer_shaders_{}_{}", std::process::id(), tag));
        std::fs::create_dir_all(&dir).unwrap();
        let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
        module.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        for name in ["line_vert", "line_frag", "model_vert", "model_frag", "skinned_vert"] {
            std::fs::write(dir.join(format!("{name}.spv")), &module).unwrap();
        }
        ShaderLibrary::new(dir)
    }

    #[test]
    fn test_path_convention() {
        let library = ShaderLibrary::new("../shaders");
        assert_eq!(library.path_for("line_vert"), PathBuf::from("../shaders/line_vert.spv"));
    }

    #[test]
    fn test_missing_file_is_shader_load_error() {
        let library = ShaderLibrary::new("/nonexistent/shader/dir");
        assert!(matches!(library.load("line_vert"), Err(RenderError::ShaderLoad { .. })));
    }

    #[test]
    fn test_spirv_validation() {
        assert!(spirv_words(&[]).is_err());
        assert!(spirv_words(&[3, 2, 35]).is_err());
        assert!(spirv_words(&[0, 0, 0, 0]).is_err());
        assert_eq!(spirv_words(&SPIRV_MAGIC.to_le_bytes()).unwrap(), vec![SPIRV_MAGIC]);
    }

    #[test]
    fn test_failed_fragment_stage_leaves_nothing_alive() {
        let library = fixture_library("stages");
        let mut device = HeadlessDevice::new();

        assert!(library.create_stages(&mut device, "line_vert", "missing_frag").is_err());
        assert_eq!(device.live_resources(), 0);

        let (vertex, fragment) = library.create_stages(&mut device, "line_vert", "line_frag").unwrap();
        assert!(device.is_alive(vertex) && device.is_alive(fragment));
    }
}
