/// Program - linked vertex + fragment SPIR-V modules, and the manager that loads them
///
/// Programs are read from `<dir>/<name>.vert.spv` and `<dir>/<name>.frag.spv`.
/// Uniform block bindings are fixed in SPIR-V, so assigning a block only
/// verifies that the shader declares it at the requested binding.

use umbra_backend::umbra::{Error, Result};
use umbra_backend::umbra::device::{Program as BackendProgram, ProgramDesc, ProgramManager, VertexLayoutKind};
use umbra_backend::{engine_bail, engine_debug, engine_err};
use ash::vk;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Uniform block declared by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReflectedBlock {
    pub set: u32,
    pub binding: u32,
}

/// Vulkan program implementation
pub struct Program {
    ctx: Arc<GpuContext>,
    name: String,
    /// Unique id, part of pipeline keys
    pub(crate) id: u64,
    pub(crate) vertex_layout: VertexLayoutKind,
    pub(crate) vertex_module: vk::ShaderModule,
    pub(crate) fragment_module: vk::ShaderModule,
    uniform_blocks: FxHashMap<String, ReflectedBlock>,
}

impl BackendProgram for Program {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_uniform_block(&self, block: &str) -> bool {
        self.uniform_blocks.contains_key(block)
    }

    fn assign_uniform_block(&self, block: &str, binding: u32) -> Result<()> {
        match self.uniform_blocks.get(block) {
            None => engine_bail!("umbra::vulkan", "Program '{}' has no uniform block '{}'", self.name, block),
            Some(reflected) if reflected.set != 0 || reflected.binding != binding => {
                engine_bail!("umbra::vulkan",
                    "Program '{}' declares '{}' at set {} binding {}, expected set 0 binding {}",
                    self.name, block, reflected.set, reflected.binding, binding)
            }
            Some(_) => Ok(()),
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.vertex_module, None);
            self.ctx.device.destroy_shader_module(self.fragment_module, None);
        }
    }
}

/// Programs handed to this device were loaded by its program manager
pub(crate) fn as_vulkan(program: &dyn BackendProgram) -> &Program {
    unsafe { &*(program as *const dyn BackendProgram as *const Program) }
}

// ============================================================================
// SPIR-V loading and reflection
// ============================================================================

/// Decode little-endian SPIR-V words
pub(crate) fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        engine_bail!("umbra::vulkan", "SPIR-V size {} is not a multiple of 4", bytes.len());
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words.first() != Some(&0x0723_0203) {
        engine_bail!("umbra::vulkan", "Missing SPIR-V magic number");
    }
    Ok(words)
}

/// Uniform blocks declared by a module, by block name
pub(crate) fn reflect_uniform_blocks(code: &[u32]) -> Result<FxHashMap<String, ReflectedBlock>> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| engine_err!("umbra::vulkan", "SPIR-V reflection failed: {:?}", e))?;

    let mut blocks = FxHashMap::default();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor { name, desc_bind, desc_ty, ty, .. } = var {
                if !matches!(desc_ty, spirq::ty::DescriptorType::UniformBuffer()) {
                    continue;
                }
                // Block type name first ("DrawParams"), instance name as fallback
                let type_name = match ty {
                    spirq::ty::Type::Struct(struct_ty) => struct_ty.name.clone(),
                    _ => None,
                };
                let block_name = type_name.or_else(|| name.clone());
                if let Some(block_name) = block_name {
                    blocks.insert(block_name, ReflectedBlock { set: desc_bind.set(), binding: desc_bind.bind() });
                }
            }
        }
    }
    Ok(blocks)
}

// ============================================================================
// ProgramManager
// ============================================================================

/// Loads programs from compiled SPIR-V files
pub struct VulkanProgramManager {
    ctx: Arc<GpuContext>,
    shader_dir: PathBuf,
}

impl VulkanProgramManager {
    pub(crate) fn new(ctx: Arc<GpuContext>, shader_dir: &Path) -> Self {
        Self { ctx, shader_dir: shader_dir.to_path_buf() }
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    fn load_module(&self, program: &str, stage: &str) -> Result<(vk::ShaderModule, FxHashMap<String, ReflectedBlock>)> {
        let path = self.shader_dir.join(format!("{}.{}.spv", program, stage));
        let bytes = std::fs::read(&path)
            .map_err(|e| engine_err!("umbra::vulkan", "Cannot read '{}': {}", path.display(), e))?;
        let code = spirv_words(&bytes)?;
        let blocks = reflect_uniform_blocks(&code)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| engine_err!("umbra::vulkan", "Failed to create shader module '{}': {:?}", path.display(), e))?;
        Ok((module, blocks))
    }
}

impl ProgramManager for VulkanProgramManager {
    fn load_program(&self, desc: &ProgramDesc) -> Result<Arc<dyn BackendProgram>> {
        let (vertex_module, mut uniform_blocks) = self.load_module(&desc.name, "vert")?;
        let (fragment_module, fragment_blocks) = match self.load_module(&desc.name, "frag") {
            Ok(loaded) => loaded,
            Err(e) => {
                unsafe { self.ctx.device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        for (block, reflected) in fragment_blocks {
            if let Some(existing) = uniform_blocks.get(&block) {
                if *existing != reflected {
                    unsafe {
                        self.ctx.device.destroy_shader_module(vertex_module, None);
                        self.ctx.device.destroy_shader_module(fragment_module, None);
                    }
                    return Err(Error::InitializationFailed(format!(
                        "Program '{}': block '{}' bound differently in vertex and fragment stages",
                        desc.name, block
                    )));
                }
            }
            uniform_blocks.insert(block, reflected);
        }

        engine_debug!("umbra::vulkan", "Program '{}' loaded ({} uniform blocks)", desc.name, uniform_blocks.len());

        Ok(Arc::new(Program {
            ctx: Arc::clone(&self.ctx),
            name: desc.name.clone(),
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            vertex_layout: desc.vertex_layout,
            vertex_module,
            fragment_module,
            uniform_blocks,
        }))
    }
}

#[cfg(test)]
#[path = "vulkan_program_tests.rs"]
mod tests;
