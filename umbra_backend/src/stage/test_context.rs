/// Shared setup for stage tests: a mock device, an executor, built target
/// sets and a 1280x720 view

use std::sync::Arc;

use bytemuck::Pod;

use crate::batch::{BatchExecutor, PARAM_RING_NAME};
use crate::frontend::test_surfaces::vertex_caches;
use crate::frontend::{ViewDef, ViewLight};
use crate::graphics_device::mock_graphics_device::{MockCommand, MockGraphicsDevice, MockProgramManager};
use crate::graphics_device::{DeviceLimits, RenderState};
use crate::settings::{BackendConfig, RenderSettings};
use crate::target::{FrameTargets, ShadowPage};
use super::{Stage, StageContext};

pub struct Harness {
    pub device: Arc<MockGraphicsDevice>,
    pub batches: BatchExecutor,
    pub targets: FrameTargets,
    pub settings: RenderSettings,
    pub view: ViewDef,
    pub programs: MockProgramManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::configured(DeviceLimits::default(), |_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut RenderSettings)) -> Self {
        Self::configured(DeviceLimits::default(), configure)
    }

    pub fn configured(limits: DeviceLimits, configure: impl FnOnce(&mut RenderSettings)) -> Self {
        let device = Arc::new(MockGraphicsDevice::with_limits(limits));
        let config = BackendConfig { max_draws_per_batch: 32, ..BackendConfig::default() };
        let batches = BatchExecutor::new(device.clone(), &config, vertex_caches(device.as_ref())).unwrap();

        let mut settings = RenderSettings::default();
        configure(&mut settings);
        let mut targets = FrameTargets::new(config.shadow_atlas_pages_per_row);
        targets.apply_settings(device.as_ref(), &mut settings, 1280, 720).unwrap();

        device.clear_commands();
        Self {
            device,
            batches,
            targets,
            settings,
            view: ViewDef::new(1280, 720),
            programs: MockProgramManager::new(),
        }
    }

    pub fn init(&self, stage: &mut dyn Stage) {
        stage.init(&self.programs, &self.batches).unwrap();
        self.device.clear_commands();
    }

    pub fn ctx(&mut self) -> StageContext<'_> {
        StageContext::new(self.device.as_ref(), &mut self.batches, &self.targets, &self.settings, &self.view)
    }

    pub fn light_ctx<'a>(&'a mut self, light: &'a ViewLight, page: Option<ShadowPage>) -> StageContext<'a> {
        let mut ctx = StageContext::new(self.device.as_ref(), &mut self.batches, &self.targets, &self.settings, &self.view);
        ctx.light = Some(light);
        ctx.shadow_page = page;
        ctx
    }
}

/// Entry counts of every multi-draw submission
pub fn submission_sizes(device: &MockGraphicsDevice) -> Vec<usize> {
    device.draw_submissions().iter().map(|s| s.len()).collect()
}

pub fn bound_programs(device: &MockGraphicsDevice) -> Vec<String> {
    device.commands().into_iter().filter_map(|c| match c {
        MockCommand::BindProgram(Some(name)) => Some(name),
        _ => None,
    }).collect()
}

pub fn render_states(device: &MockGraphicsDevice) -> Vec<RenderState> {
    device.commands().into_iter().filter_map(|c| match c {
        MockCommand::SetRenderState(state) => Some(state),
        _ => None,
    }).collect()
}

/// Bytes of every write into the parameter ring, in order
pub fn ring_writes(device: &MockGraphicsDevice) -> Vec<Vec<u8>> {
    let Some(ring) = device.buffer(PARAM_RING_NAME) else {
        return Vec::new();
    };
    let contents = ring.contents();
    device.commands().into_iter().filter_map(|c| match c {
        MockCommand::WriteBuffer { name, offset, len } if name == PARAM_RING_NAME => {
            Some(contents[offset as usize..(offset + len) as usize].to_vec())
        }
        _ => None,
    }).collect()
}

/// Decode a parameter array written by a batch flush
pub fn params_of<P: Pod>(bytes: &[u8]) -> Vec<P> {
    bytes.chunks_exact(std::mem::size_of::<P>()).map(bytemuck::pod_read_unaligned).collect()
}
