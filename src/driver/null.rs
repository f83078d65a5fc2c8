//! Headless driver used by the test suite.
//!
//! Mints opaque handles, enforces descriptor-pool set capacities the way a
//! conforming driver would, and records update traffic so tests can assert
//! on batching behavior. No GPU is touched.

use {
    super::{
        DescriptorCopy, DescriptorSetLayoutBinding, DescriptorWrite, Device, DriverError,
        PoolSize, PushConstantRange,
    },
    log::warn,
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering},
    },
};

/// Opaque non-zero object handle minted by a [`NullDevice`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NullHandle(u64);

#[derive(Debug)]
struct NullPool {
    max_sets: u32,
    allocated: u32,
    pool_sizes: Vec<PoolSize>,
}

/// In-process implementation of the driver boundary.
#[derive(Debug, Default)]
pub struct NullDevice {
    next_handle: AtomicU64,
    live_objects: AtomicI64,
    pools: Mutex<HashMap<NullHandle, NullPool>>,
    update_calls: AtomicUsize,
    writes_applied: AtomicUsize,
    copies_applied: AtomicUsize,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self) -> NullHandle {
        NullHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn track_create(&self) -> NullHandle {
        self.live_objects.fetch_add(1, Ordering::Relaxed);
        self.mint()
    }

    fn track_destroy(&self) {
        self.live_objects.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of created-but-not-destroyed objects.
    pub fn live_objects(&self) -> i64 {
        self.live_objects.load(Ordering::Relaxed)
    }

    /// Number of `update_descriptor_sets` calls issued so far.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::Relaxed)
    }

    /// Total writes applied across all update calls.
    pub fn writes_applied(&self) -> usize {
        self.writes_applied.load(Ordering::Relaxed)
    }

    /// Total copies applied across all update calls.
    pub fn copies_applied(&self) -> usize {
        self.copies_applied.load(Ordering::Relaxed)
    }

    /// Declared per-type capacities of a live pool.
    pub fn pool_sizes(&self, pool: NullHandle) -> Option<Vec<PoolSize>> {
        self.pools
            .lock()
            .get(&pool)
            .map(|pool| pool.pool_sizes.clone())
    }
}

impl Device for NullDevice {
    type DescriptorSetLayout = NullHandle;
    type DescriptorPool = NullHandle;
    type DescriptorSet = NullHandle;
    type PipelineLayout = NullHandle;
    type ShaderModule = NullHandle;
    type Sampler = NullHandle;
    type Buffer = NullHandle;
    type BufferView = NullHandle;
    type ImageView = NullHandle;

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorSetLayoutBinding<Self>],
    ) -> Result<Self::DescriptorSetLayout, DriverError> {
        Ok(self.track_create())
    }

    fn destroy_descriptor_set_layout(&self, _layout: Self::DescriptorSetLayout) {
        self.track_destroy();
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[PoolSize],
    ) -> Result<Self::DescriptorPool, DriverError> {
        let handle = self.track_create();
        self.pools.lock().insert(
            handle,
            NullPool {
                max_sets,
                allocated: 0,
                pool_sizes: pool_sizes.to_vec(),
            },
        );

        Ok(handle)
    }

    fn destroy_descriptor_pool(&self, pool: Self::DescriptorPool) {
        self.pools.lock().remove(&pool);
        self.track_destroy();
    }

    fn reset_descriptor_pool(&self, pool: Self::DescriptorPool) -> Result<(), DriverError> {
        match self.pools.lock().get_mut(&pool) {
            Some(pool) => {
                pool.allocated = 0;
                Ok(())
            }
            None => {
                warn!("reset of unknown descriptor pool {pool:?}");

                Err(DriverError::InvalidData)
            }
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: Self::DescriptorPool,
        _layout: Self::DescriptorSetLayout,
    ) -> Result<Self::DescriptorSet, DriverError> {
        let mut pools = self.pools.lock();
        let pool = match pools.get_mut(&pool) {
            Some(pool) => pool,
            None => {
                warn!("allocation from unknown descriptor pool {pool:?}");

                return Err(DriverError::InvalidData);
            }
        };

        if pool.allocated == pool.max_sets {
            warn!("descriptor pool exhausted ({} sets)", pool.max_sets);

            return Err(DriverError::OutOfMemory);
        }

        pool.allocated += 1;
        Ok(self.mint())
    }

    fn update_descriptor_sets(
        &self,
        writes: &[DescriptorWrite<Self>],
        copies: &[DescriptorCopy<Self>],
    ) {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        self.writes_applied.fetch_add(writes.len(), Ordering::Relaxed);
        self.copies_applied.fetch_add(copies.len(), Ordering::Relaxed);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[Self::DescriptorSetLayout],
        _push_constant_ranges: &[PushConstantRange],
    ) -> Result<Self::PipelineLayout, DriverError> {
        Ok(self.track_create())
    }

    fn destroy_pipeline_layout(&self, _layout: Self::PipelineLayout) {
        self.track_destroy();
    }

    fn create_shader_module(&self, spirv: &[u32]) -> Result<Self::ShaderModule, DriverError> {
        if spirv.is_empty() {
            warn!("refusing to create an empty shader module");

            return Err(DriverError::InvalidData);
        }

        Ok(self.track_create())
    }

    fn destroy_shader_module(&self, _module: Self::ShaderModule) {
        self.track_destroy();
    }
}
