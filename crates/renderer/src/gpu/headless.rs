use std::collections::HashMap;

use crate::types::Resolution;

use super::{
    DrawCall, FramebufferHandle, GpuBackend, GpuError, ProgramDesc, ProgramHandle, RenderTarget,
    TextureHandle,
};

/// Texture units reported when the caller does not pick a number.
const DEFAULT_TEXTURE_UNITS: u32 = 80;

/// A call observed by [`HeadlessGpu`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    Draw(DrawCall),
    Blit {
        source: TextureHandle,
        target: RenderTarget,
    },
    EndFrame,
}

/// Recording backend with no device behind it.
///
/// Object lifetimes are tracked exactly, so leaks and double frees show up
/// in `live_*` counts and in debug assertions. A fragment source containing
/// an `#error` directive fails to compile, as it would on a real driver.
#[derive(Debug)]
pub struct HeadlessGpu {
    viewport: Resolution,
    texture_units: u32,
    next_id: u32,
    render_targets: HashMap<FramebufferHandle, TextureHandle>,
    textures: HashMap<TextureHandle, Resolution>,
    programs: HashMap<ProgramHandle, ProgramDesc>,
    compiled_total: usize,
    commands: Vec<RecordedCommand>,
    recording: bool,
    frames: u64,
    in_frame: bool,
}

impl HeadlessGpu {
    pub fn new(viewport: Resolution) -> Self {
        Self {
            viewport,
            texture_units: DEFAULT_TEXTURE_UNITS,
            next_id: 1,
            render_targets: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            compiled_total: 0,
            commands: Vec::new(),
            recording: true,
            frames: 0,
            in_frame: false,
        }
    }

    pub fn with_texture_units(mut self, units: u32) -> Self {
        self.texture_units = units;
        self
    }

    /// Keeps lifetime tracking but stops storing commands, for long runs.
    pub fn without_recording(mut self) -> Self {
        self.recording = false;
        self
    }

    /// Frames completed with `end_frame`.
    pub fn frames_completed(&self) -> u64 {
        self.frames
    }

    fn record(&mut self, command: RecordedCommand) {
        if self.recording {
            self.commands.push(command);
        }
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Draw calls recorded so far, in order.
    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|command| match command {
            RecordedCommand::Draw(call) => Some(call),
            _ => None,
        })
    }

    pub fn live_render_targets(&self) -> usize {
        self.render_targets.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Number of successful `compile_program` calls over the backend lifetime.
    pub fn compiled_total(&self) -> usize {
        self.compiled_total
    }

    pub fn texture_resolution(&self, texture: TextureHandle) -> Option<Resolution> {
        self.textures.get(&texture).copied()
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GpuBackend for HeadlessGpu {
    fn max_texture_units(&self) -> u32 {
        self.texture_units
    }

    fn viewport(&self) -> Resolution {
        self.viewport
    }

    fn resize_viewport(&mut self, resolution: Resolution) {
        self.viewport = resolution.non_zero();
    }

    fn create_render_target(
        &mut self,
        resolution: Resolution,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(GpuError::TargetIncomplete(format!(
                "zero-sized attachment {resolution}"
            )));
        }
        let framebuffer = FramebufferHandle(self.allocate_id());
        let texture = TextureHandle(self.allocate_id());
        self.render_targets.insert(framebuffer, texture);
        self.textures.insert(texture, resolution);
        Ok((framebuffer, texture))
    }

    fn resize_render_target(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        resolution: Resolution,
    ) -> Result<(), GpuError> {
        if self.render_targets.get(&framebuffer) != Some(&texture) {
            return Err(GpuError::TargetIncomplete(format!(
                "framebuffer {} is not bound to texture {}",
                framebuffer.0, texture.0
            )));
        }
        self.textures.insert(texture, resolution.non_zero());
        Ok(())
    }

    fn destroy_render_target(&mut self, framebuffer: FramebufferHandle, texture: TextureHandle) {
        let removed = self.render_targets.remove(&framebuffer);
        debug_assert_eq!(removed, Some(texture), "render target destroyed twice");
        self.textures.remove(&texture);
    }

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<ProgramHandle, GpuError> {
        let has_error = |source: &str| {
            source
                .lines()
                .any(|line| line.trim_start().starts_with("#error"))
        };
        if has_error(&desc.vertex_source) || has_error(&desc.fragment_source) {
            return Err(GpuError::Compile {
                label: desc.label.clone(),
                message: "#error directive encountered".into(),
            });
        }
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(handle, desc.clone());
        self.compiled_total += 1;
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        let removed = self.programs.remove(&program);
        debug_assert!(removed.is_some(), "program deleted twice");
    }

    fn begin_frame(&mut self) -> Result<(), GpuError> {
        debug_assert!(!self.in_frame, "frame opened twice");
        self.in_frame = true;
        self.record(RecordedCommand::BeginFrame);
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) {
        debug_assert!(
            self.programs.contains_key(&call.program),
            "draw with a deleted program"
        );
        if let RenderTarget::Framebuffer(framebuffer) = call.target {
            debug_assert!(
                self.render_targets.contains_key(&framebuffer),
                "draw into a destroyed framebuffer"
            );
        }
        self.record(RecordedCommand::Draw(call.clone()));
    }

    fn blit(&mut self, source: TextureHandle, target: RenderTarget) {
        debug_assert!(self.textures.contains_key(&source), "blit from a destroyed texture");
        self.record(RecordedCommand::Blit { source, target });
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        self.in_frame = false;
        self.frames += 1;
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::VertexKind;

    fn desc(fragment: &str) -> ProgramDesc {
        ProgramDesc {
            label: "test".into(),
            vertex_source: "void main() {}".into(),
            fragment_source: fragment.into(),
            vertex_kind: VertexKind::Quad,
            samplers: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    #[test]
    fn tracks_render_target_lifetimes() {
        let mut gpu = HeadlessGpu::new(Resolution::new(640, 480));
        let (fb, tex) = gpu.create_render_target(Resolution::new(64, 64)).unwrap();
        assert_eq!(gpu.live_render_targets(), 1);
        gpu.resize_render_target(fb, tex, Resolution::new(32, 16))
            .unwrap();
        assert_eq!(gpu.texture_resolution(tex), Some(Resolution::new(32, 16)));
        gpu.destroy_render_target(fb, tex);
        assert_eq!(gpu.live_render_targets(), 0);
    }

    #[test]
    fn error_directive_fails_compilation() {
        let mut gpu = HeadlessGpu::new(Resolution::new(640, 480));
        assert!(gpu.compile_program(&desc("void main() {}")).is_ok());
        let err = gpu
            .compile_program(&desc("#error broken\nvoid main() {}"))
            .unwrap_err();
        assert!(matches!(err, GpuError::Compile { .. }));
        assert_eq!(gpu.live_programs(), 1);
    }
}
