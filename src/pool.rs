//! Descriptor staging pools.
//!
//! Per-draw descriptor sets are short-lived: they are allocated, bound, and
//! abandoned once the GPU is done with the frame. [`StagingDescriptorSetPool`]
//! owns a chain of fixed-capacity pools with geometrically increasing size,
//! hands out sets until the pool under its cursor runs dry, and bulk-recycles
//! everything with one [`reset`](StagingDescriptorSetPool::reset) per reuse
//! cycle.

use {
    crate::{
        driver::{DescriptorPool, DescriptorType, Device, DriverError, PoolSize},
        small_vec::SmallVec,
    },
    derive_builder::Builder,
    log::trace,
    std::sync::Arc,
};

/// Non-zero per-type pool sizes, at most one entry per descriptor type.
pub type PoolSizes = SmallVec<PoolSize, { DescriptorType::COUNT }>;

/// Tallies required descriptor counts per type and emits the minimal
/// pool-size list for native pool creation.
#[derive(Clone, Debug, Default)]
pub struct PoolSizeAccumulator {
    counts: [u32; DescriptorType::COUNT],
}

impl PoolSizeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, ty: DescriptorType, count: u32) {
        self.counts[ty.as_index()] += count;
    }

    /// Emits one entry per type with a non-zero total, in ascending type
    /// order.
    pub fn finalize(self) -> PoolSizes {
        let mut pool_sizes = PoolSizes::new();
        for ty in DescriptorType::ALL {
            let descriptor_count = self.counts[ty.as_index()];
            if descriptor_count > 0 {
                pool_sizes.push(PoolSize {
                    ty,
                    descriptor_count,
                });
            }
        }

        pool_sizes
    }
}

/// Capacity schedule of a staging pool chain.
#[derive(Builder, Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[builder(pattern = "owned", derive(Debug))]
pub struct StagingPoolInfo {
    /// Descriptor sets the first pool of a chain may allocate.
    #[builder(default = "64")]
    pub base_set_capacity: u32,

    /// Descriptors of each type the first pool of a chain provides.
    #[builder(default = "256")]
    pub base_descriptor_capacity: u32,

    /// Level at which the doubling schedule saturates; bounds worst-case
    /// per-pool memory. Tunable, not load-bearing.
    #[builder(default = "5")]
    pub max_growth_shift: u32,
}

impl StagingPoolInfo {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> StagingPoolInfoBuilder {
        StagingPoolInfoBuilder::default()
    }
}

impl Default for StagingPoolInfo {
    fn default() -> Self {
        StagingPoolInfoBuilder::default().build().unwrap()
    }
}

impl From<StagingPoolInfoBuilder> for StagingPoolInfo {
    fn from(info: StagingPoolInfoBuilder) -> Self {
        info.build().unwrap()
    }
}

/// One fixed-capacity native pool with per-type usage accounting.
#[derive(Debug)]
pub struct StagingDescriptorPool<D: Device> {
    descriptor_pool: DescriptorPool<D>,
    set_capacity: u32,
    sets_allocated: u32,
    capacities: [u32; DescriptorType::COUNT],
    usage: [u32; DescriptorType::COUNT],
}

impl<D: Device> StagingDescriptorPool<D> {
    /// Creates the native pool sized exactly to the requested caps.
    pub fn create(
        device: &Arc<D>,
        set_capacity: u32,
        pool_sizes: &[PoolSize],
    ) -> Result<Self, DriverError> {
        let mut capacities = [0; DescriptorType::COUNT];
        for pool_size in pool_sizes {
            capacities[pool_size.ty.as_index()] += pool_size.descriptor_count;
        }

        let descriptor_pool = DescriptorPool::create(device, set_capacity, pool_sizes)?;

        Ok(Self {
            descriptor_pool,
            set_capacity,
            sets_allocated: 0,
            capacities,
            usage: [0; DescriptorType::COUNT],
        })
    }

    /// Whether one more set with the given per-type descriptor counts still
    /// fits. Pure query.
    pub fn has_capacity(&self, sizes: &[PoolSize]) -> bool {
        if self.sets_allocated == self.set_capacity {
            return false;
        }

        sizes.iter().all(|size| {
            self.usage[size.ty.as_index()] + size.descriptor_count
                <= self.capacities[size.ty.as_index()]
        })
    }

    /// Allocates one set, charging `sizes` against the per-type counters.
    ///
    /// Callers must check [`has_capacity`](Self::has_capacity) first; the
    /// set-count cap is asserted, not recoverable.
    pub fn allocate_descriptor_set(
        &mut self,
        layout: D::DescriptorSetLayout,
        sizes: &[PoolSize],
    ) -> Result<D::DescriptorSet, DriverError> {
        assert!(
            self.sets_allocated < self.set_capacity,
            "staging descriptor pool exhausted"
        );

        self.sets_allocated += 1;
        for size in sizes {
            self.usage[size.ty.as_index()] += size.descriptor_count;
        }

        DescriptorPool::allocate_descriptor_set(&self.descriptor_pool, layout)
    }

    /// Bulk-frees every set and zeroes the usage counters. Cheap no-op when
    /// nothing was allocated since the last reset.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        if self.sets_allocated > 0 {
            DescriptorPool::reset(&self.descriptor_pool)?;
            self.sets_allocated = 0;
            self.usage = [0; DescriptorType::COUNT];
        }

        Ok(())
    }
}

/// A chain of staging pools; callers never reason about per-pool
/// exhaustion.
#[derive(Debug)]
pub struct StagingDescriptorSetPool<D: Device> {
    device: Arc<D>,
    info: StagingPoolInfo,
    pools: Vec<StagingDescriptorPool<D>>,
    cursor: usize,
    capacity_level: u32,
}

impl<D: Device> StagingDescriptorSetPool<D> {
    pub fn new(device: &Arc<D>, info: impl Into<StagingPoolInfo>) -> Self {
        Self {
            device: Arc::clone(device),
            info: info.into(),
            pools: Vec::new(),
            cursor: 0,
            capacity_level: 0,
        }
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn grown_capacity(&self, base: u32) -> u32 {
        base << self.capacity_level.min(self.info.max_growth_shift)
    }

    /// Appends one pool at the current capacity level. Chain pools carry
    /// every descriptor type so they can serve arbitrary layouts.
    fn append_pool(&mut self) -> Result<(), DriverError> {
        let set_capacity = self.grown_capacity(self.info.base_set_capacity);
        let descriptor_capacity = self.grown_capacity(self.info.base_descriptor_capacity);

        trace!(
            "staging pool chain grows to {} pools ({} sets)",
            self.pools.len() + 1,
            set_capacity
        );

        let pool_sizes = DescriptorType::ALL.map(|ty| PoolSize {
            ty,
            descriptor_count: descriptor_capacity,
        });

        self.pools.push(StagingDescriptorPool::create(
            &self.device,
            set_capacity,
            &pool_sizes,
        )?);
        self.capacity_level += 1;

        Ok(())
    }

    /// Allocates one set, advancing to the next pool on exhaustion and
    /// appending exactly one larger pool when the chain ends.
    pub fn allocate_descriptor_set(
        &mut self,
        layout: D::DescriptorSetLayout,
        sizes: &[PoolSize],
    ) -> Result<D::DescriptorSet, DriverError> {
        if self.pools.is_empty() {
            self.append_pool()?;
        } else if !self.pools[self.cursor].has_capacity(sizes) {
            self.cursor += 1;
            if self.cursor == self.pools.len() {
                self.append_pool()?;
            }
        }

        self.pools[self.cursor].allocate_descriptor_set(layout, sizes)
    }

    /// Resets every pool up to and including the cursor and rewinds the
    /// cursor. Must not be called while any set handed out is still in use
    /// by the GPU.
    pub fn reset(&mut self) -> Result<(), DriverError> {
        if self.pools.is_empty() {
            return Ok(());
        }

        // Pools past the cursor were never written to.
        for pool in &mut self.pools[..=self.cursor] {
            pool.reset()?;
        }
        self.cursor = 0;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::driver::{null::NullDevice, DescriptorSetLayout, DescriptorSetLayoutBinding},
    };

    fn uniform_sizes(count: u32) -> Vec<PoolSize> {
        vec![PoolSize {
            ty: DescriptorType::UniformBuffer,
            descriptor_count: count,
        }]
    }

    fn test_layout(device: &Arc<NullDevice>) -> DescriptorSetLayout<NullDevice> {
        DescriptorSetLayout::create(
            device,
            vec![DescriptorSetLayoutBinding::new(
                0,
                DescriptorType::UniformBuffer,
            )],
        )
        .unwrap()
    }

    #[test]
    fn accumulator_merges_and_orders_types() {
        let mut accum = PoolSizeAccumulator::new();
        accum.accumulate(DescriptorType::Sampler, 3);
        accum.accumulate(DescriptorType::Sampler, 2);
        accum.accumulate(DescriptorType::UniformBuffer, 1);

        let pool_sizes = accum.finalize();
        assert_eq!(
            pool_sizes.as_slice(),
            [
                PoolSize {
                    ty: DescriptorType::Sampler,
                    descriptor_count: 5,
                },
                PoolSize {
                    ty: DescriptorType::UniformBuffer,
                    descriptor_count: 1,
                },
            ]
        );
    }

    #[test]
    fn accumulator_emits_nothing_for_zero_counts() {
        assert!(PoolSizeAccumulator::new().finalize().is_empty());
    }

    #[test]
    fn staging_pool_tracks_capacity() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);

        let mut pool = StagingDescriptorPool::create(&device, 2, &uniform_sizes(4)).unwrap();

        assert!(pool.has_capacity(&uniform_sizes(4)));
        assert!(!pool.has_capacity(&uniform_sizes(5)));

        pool.allocate_descriptor_set(*layout, &uniform_sizes(3))
            .unwrap();
        assert!(pool.has_capacity(&uniform_sizes(1)));
        assert!(!pool.has_capacity(&uniform_sizes(2)));

        pool.allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        // Set cap reached.
        assert!(!pool.has_capacity(&uniform_sizes(0)));

        pool.reset().unwrap();
        assert!(pool.has_capacity(&uniform_sizes(4)));
    }

    #[test]
    #[should_panic(expected = "staging descriptor pool exhausted")]
    fn staging_pool_asserts_past_set_cap() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);

        let mut pool = StagingDescriptorPool::create(&device, 1, &uniform_sizes(16)).unwrap();
        pool.allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        let _ = pool.allocate_descriptor_set(*layout, &uniform_sizes(1));
    }

    #[test]
    fn chain_grows_one_pool_per_exhaustion() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);
        let mut chain = StagingDescriptorSetPool::new(
            &device,
            StagingPoolInfo::new()
                .base_set_capacity(2)
                .base_descriptor_capacity(16),
        );

        assert_eq!(chain.pool_count(), 0);

        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        assert_eq!(chain.pool_count(), 1);

        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        assert_eq!(chain.pool_count(), 1);

        // Marginal overflow grows the chain by exactly one pool.
        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        assert_eq!(chain.pool_count(), 2);

        // The second pool doubled: 4 sets before the next growth.
        for _ in 0..3 {
            chain
                .allocate_descriptor_set(*layout, &uniform_sizes(1))
                .unwrap();
        }
        assert_eq!(chain.pool_count(), 2);

        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(1))
            .unwrap();
        assert_eq!(chain.pool_count(), 3);
    }

    #[test]
    fn chain_advances_on_per_type_exhaustion() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);
        let mut chain = StagingDescriptorSetPool::new(
            &device,
            StagingPoolInfo::new()
                .base_set_capacity(8)
                .base_descriptor_capacity(4),
        );

        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(3))
            .unwrap();
        assert_eq!(chain.pool_count(), 1);

        // 3 + 3 exceeds the 4 uniform descriptors of the first pool.
        chain
            .allocate_descriptor_set(*layout, &uniform_sizes(3))
            .unwrap();
        assert_eq!(chain.pool_count(), 2);
    }

    #[test]
    fn reset_and_replay_matches_pool_creation_pattern() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);
        let mut chain = StagingDescriptorSetPool::new(
            &device,
            StagingPoolInfo::new()
                .base_set_capacity(2)
                .base_descriptor_capacity(16),
        );

        let run = |chain: &mut StagingDescriptorSetPool<NullDevice>| {
            for _ in 0..5 {
                chain
                    .allocate_descriptor_set(*layout, &uniform_sizes(1))
                    .unwrap();
            }
            chain.pool_count()
        };

        let pools_first = run(&mut chain);
        chain.reset().unwrap();
        let pools_second = run(&mut chain);

        // Replaying the same allocation sequence reuses the chain without
        // growing it further.
        assert_eq!(pools_first, 2);
        assert_eq!(pools_second, 2);
    }

    #[test]
    fn growth_shift_saturates() {
        let device = Arc::new(NullDevice::new());
        let layout = test_layout(&device);
        let mut chain = StagingDescriptorSetPool::new(
            &device,
            StagingPoolInfo::new()
                .base_set_capacity(1)
                .base_descriptor_capacity(4)
                .max_growth_shift(1),
        );

        // Pool capacities: 1, 2, 2, 2, ... sets once the shift saturates.
        let mut sets = 0;
        while chain.pool_count() < 4 {
            chain
                .allocate_descriptor_set(*layout, &uniform_sizes(0))
                .unwrap();
            sets += 1;
        }

        assert_eq!(sets, 1 + 2 + 2 + 1);
    }
}
