//! Shader program lifetime and the shared compile cache.
//!
//! Programs are handed out as `Arc<ShaderProgram>`. When the last clone is
//! dropped (cache eviction, renderer disposal, or both) the GPU handle is
//! posted to a retire channel instead of being deleted in place, because the
//! drop may happen on the command thread. The render thread drains that
//! channel at the start of every frame.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::cache::LruCache;
use crate::gpu::{GpuBackend, GpuError, ProgramDesc, ProgramHandle, VertexKind};

/// GLSL sources compiled into the binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinShader {
    /// Pass-through vertex stage for the full-screen quad.
    QuadVertex,
    /// Samples `source` across the whole target.
    BlitFragment,
    /// Mixes `oldBuffer` into `newBuffer` by `fadeLevel`.
    CrossfadeFragment,
}

impl BuiltinShader {
    pub fn source(self) -> &'static str {
        match self {
            BuiltinShader::QuadVertex => QUAD_VERTEX_GLSL,
            BuiltinShader::BlitFragment => BLIT_FRAGMENT_GLSL,
            BuiltinShader::CrossfadeFragment => CROSSFADE_FRAGMENT_GLSL,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BuiltinShader::QuadVertex => "builtin:quad.vert",
            BuiltinShader::BlitFragment => "builtin:blit.frag",
            BuiltinShader::CrossfadeFragment => "builtin:crossfade.frag",
        }
    }
}

/// Where a shader stage's source text comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderOrigin {
    File(PathBuf),
    Builtin(BuiltinShader),
}

impl ShaderOrigin {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ShaderOrigin::File(path) => Some(path),
            ShaderOrigin::Builtin(_) => None,
        }
    }

    fn read(&self) -> Result<String, ShaderError> {
        match self {
            ShaderOrigin::File(path) => {
                std::fs::read_to_string(path).map_err(|source| ShaderError::Read {
                    path: path.clone(),
                    source,
                })
            }
            ShaderOrigin::Builtin(builtin) => Ok(builtin.source().to_string()),
        }
    }
}

impl fmt::Display for ShaderOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderOrigin::File(path) => write!(f, "{}", path.display()),
            ShaderOrigin::Builtin(builtin) => f.write_str(builtin.name()),
        }
    }
}

/// Identity of a compiled program: both stage origins plus everything the
/// backend bakes into the wrapped source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub vertex: ShaderOrigin,
    pub fragment: ShaderOrigin,
    pub samplers: Vec<String>,
    pub uniforms: Vec<String>,
    pub vertex_kind: VertexKind,
}

impl ShaderKey {
    pub fn new(vertex: ShaderOrigin, fragment: ShaderOrigin, vertex_kind: VertexKind) -> Self {
        Self {
            vertex,
            fragment,
            samplers: Vec::new(),
            uniforms: Vec::new(),
            vertex_kind,
        }
    }

    pub fn with_samplers<I, S>(mut self, samplers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.samplers = samplers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_uniforms<I, S>(mut self, uniforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniforms = uniforms.into_iter().map(Into::into).collect();
        self
    }

    /// Built-in blit program used to present offscreen buffers.
    pub fn blit() -> Self {
        Self::new(
            ShaderOrigin::Builtin(BuiltinShader::QuadVertex),
            ShaderOrigin::Builtin(BuiltinShader::BlitFragment),
            VertexKind::Quad,
        )
        .with_samplers(["source"])
    }

    fn references(&self, path: &Path) -> bool {
        self.vertex.path() == Some(path) || self.fragment.path() == Some(path)
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.vertex, self.fragment)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("failed to read shader {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Compile(#[from] GpuError),
}

/// A compiled program. Dropping the last reference retires the GPU handle.
pub struct ShaderProgram {
    handle: ProgramHandle,
    key: ShaderKey,
    retire: Sender<ProgramHandle>,
}

impl ShaderProgram {
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn key(&self) -> &ShaderKey {
        &self.key
    }
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("handle", &self.handle)
            .field("key", &self.key.to_string())
            .finish()
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        // The receiver lives in the cache; if it is gone the device is too.
        let _ = self.retire.send(self.handle);
    }
}

/// Shared LRU of compiled programs.
pub struct ShaderCache {
    programs: LruCache<ShaderKey, Arc<ShaderProgram>>,
    retire_tx: Sender<ProgramHandle>,
    retire_rx: Receiver<ProgramHandle>,
}

impl ShaderCache {
    pub fn new(capacity: usize) -> Self {
        let (retire_tx, retire_rx) = crossbeam_channel::unbounded();
        Self {
            programs: LruCache::new(capacity.max(1)),
            retire_tx,
            retire_rx,
        }
    }

    /// Returns the cached program for `key`, compiling and caching it on a miss.
    pub fn get_or_compile<G: GpuBackend>(
        &self,
        gpu: &mut G,
        key: &ShaderKey,
    ) -> Result<Arc<ShaderProgram>, ShaderError> {
        if let Some(program) = self.programs.get(key) {
            tracing::trace!(shader = %key, "shader cache hit");
            return Ok(program);
        }

        let desc = ProgramDesc {
            label: key.to_string(),
            vertex_source: key.vertex.read()?,
            fragment_source: key.fragment.read()?,
            vertex_kind: key.vertex_kind,
            samplers: key.samplers.clone(),
            uniforms: key.uniforms.clone(),
        };
        let handle = gpu.compile_program(&desc)?;
        tracing::debug!(shader = %key, "compiled shader program");

        let program = Arc::new(ShaderProgram {
            handle,
            key: key.clone(),
            retire: self.retire_tx.clone(),
        });
        self.programs.try_add(key.clone(), program.clone());
        Ok(program)
    }

    /// Deletes GPU programs whose last reference has been dropped.
    ///
    /// Must run on the render thread.
    pub fn collect_retired<G: GpuBackend>(&self, gpu: &mut G) -> usize {
        let mut retired = 0;
        for handle in self.retire_rx.try_iter() {
            gpu.delete_program(handle);
            retired += 1;
        }
        if retired > 0 {
            tracing::debug!(retired, "deleted retired shader programs");
        }
        retired
    }

    /// Drops cached programs compiled from any of `paths`.
    pub fn invalidate_paths(&self, paths: &[PathBuf]) -> usize {
        let removed = self
            .programs
            .remove_where(|key| paths.iter().any(|path| key.references(path)));
        if removed > 0 {
            tracing::info!(removed, "invalidated cached shaders");
        }
        removed
    }

    pub fn contains(&self, key: &ShaderKey) -> bool {
        self.programs.contains_key(key)
    }

    /// Test mode: every lookup recompiles from disk.
    pub fn set_caching_disabled(&self, disabled: bool) {
        self.programs.set_caching_disabled(disabled);
        tracing::info!(disabled, "shader caching toggled");
    }

    pub fn caching_disabled(&self) -> bool {
        self.programs.caching_disabled()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.programs.capacity()
    }

    pub fn clear(&self) {
        self.programs.clear();
    }
}

const QUAD_VERTEX_GLSL: &str = r"#version 450
in vec3 vertices;
in vec2 vertexTexCoords;
out vec2 fragCoord;

void main() {
    gl_Position = vec4(vertices, 1.0);
    fragCoord = vertexTexCoords;
}
";

const BLIT_FRAGMENT_GLSL: &str = r"#version 450
in vec2 fragCoord;
out vec4 fragColor;
uniform sampler2D source;

void main() {
    fragColor = texture(source, fragCoord);
}
";

const CROSSFADE_FRAGMENT_GLSL: &str = r"#version 450
in vec2 fragCoord;
out vec4 fragColor;
uniform sampler2D oldBuffer;
uniform sampler2D newBuffer;
uniform float fadeLevel;

void main() {
    vec4 previous = texture(oldBuffer, fragCoord);
    vec4 next = texture(newBuffer, fragCoord);
    fragColor = mix(previous, next, clamp(fadeLevel, 0.0, 1.0));
}
";
