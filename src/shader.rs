//! Shaders and the shader-module permutation pool.
//!
//! A [`Shader`] owns SPIR-V bytes plus the stage it targets; reflection and
//! binding classification come from [`crate::spirv`]. Binding pipeline
//! layouts to shaders may require re-assigning descriptor set/binding slots
//! in the module, so native modules are memoized per (shader, permutation)
//! pair in a [`ShaderModulePool`] and dropped when either side is released.

use {
    crate::{
        driver::{Device, DriverError, ShaderModule, StageFlags},
        spirv::{patch_slots, Module, ReflectedBinding, Reflection, SlotPatch, SpirvError},
    },
    derive_builder::Builder,
    log::warn,
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

fn next_shader_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);

    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// SPIR-V shader for one pipeline stage.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", derive(Debug))]
pub struct Shader {
    /// Entry point function name.
    #[builder(default = "\"main\".to_owned()")]
    pub entry_name: String,

    pub spirv: Vec<u8>,

    pub stage: StageFlags,

    #[builder(setter(skip), default = "next_shader_id()")]
    id: u64,
}

impl Shader {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(stage: StageFlags, spirv: impl Into<Vec<u8>>) -> ShaderBuilder {
        ShaderBuilder::default().spirv(spirv.into()).stage(stage)
    }

    pub fn new_compute(spirv: impl Into<Vec<u8>>) -> ShaderBuilder {
        Self::new(StageFlags::COMPUTE, spirv)
    }

    pub fn new_fragment(spirv: impl Into<Vec<u8>>) -> ShaderBuilder {
        Self::new(StageFlags::FRAGMENT, spirv)
    }

    pub fn new_vertex(spirv: impl Into<Vec<u8>>) -> ShaderBuilder {
        Self::new(StageFlags::VERTEX, spirv)
    }

    /// Process-unique identity, stable across clones of the builder output.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module(&self) -> Result<Module, SpirvError> {
        Module::new(&self.spirv)
    }

    pub fn reflection(&self) -> Result<Reflection, SpirvError> {
        Reflection::reflect(&self.module()?)
    }

    /// Descriptor bindings the shader's resources require.
    pub fn descriptor_bindings(&self) -> Result<Vec<ReflectedBinding>, SpirvError> {
        self.reflection()?.descriptor_bindings()
    }
}

impl From<ShaderBuilder> for Shader {
    fn from(shader: ShaderBuilder) -> Self {
        shader.build().unwrap()
    }
}

/// Memoized native shader modules keyed by (shader, permutation).
///
/// One instance per device; permuted modules patch descriptor slots with
/// the word offsets recorded by reflection before creation.
#[derive(Debug)]
pub struct ShaderModulePool<D: Device> {
    device: Arc<D>,
    modules: Mutex<HashMap<(u64, u64), ShaderModule<D>>>,
}

impl<D: Device> ShaderModulePool<D> {
    pub fn new(device: &Arc<D>) -> Self {
        Self {
            device: Arc::clone(device),
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }

    /// Returns the module for `shader` permuted for `permutation_id`,
    /// creating it on first use. `patches` rewrite descriptor slot literals
    /// before the native module is created; pass none for the identity
    /// permutation.
    pub fn get_or_create(
        &self,
        shader: &Shader,
        permutation_id: u64,
        patches: &[SlotPatch],
    ) -> Result<D::ShaderModule, DriverError> {
        let mut modules = self.modules.lock();
        let key = (shader.id(), permutation_id);

        if let Some(module) = modules.get(&key) {
            return Ok(**module);
        }

        let module = Module::new(&shader.spirv).map_err(|err| {
            warn!("{err}");

            DriverError::InvalidData
        })?;

        let mut words = module.into_words();
        patch_slots(&mut words, patches).map_err(|err| {
            warn!("{err}");

            DriverError::InvalidData
        })?;

        let module = ShaderModule::create(&self.device, &words)?;
        let raw = *module;
        modules.insert(key, module);

        Ok(raw)
    }

    /// Drops every module created from `shader`.
    pub fn remove_shader(&self, shader_id: u64) {
        self.modules
            .lock()
            .retain(|(shader, _), _| *shader != shader_id);
    }

    /// Drops every module permuted for `permutation_id`.
    pub fn remove_permutation(&self, permutation_id: u64) {
        self.modules
            .lock()
            .retain(|(_, permutation), _| *permutation != permutation_id);
    }
}
