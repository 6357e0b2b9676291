//! Structure Seeding
//!
//! A listener that scatters a handful of floating structures around each
//! newly materialized space, inside its territory so that the spawn policy
//! lets their spawners work. Placement itself belongs to the host.

use dashmap::DashSet;
use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, UnitCircle};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::components::OwnerId;
use crate::engine::DimensionListener;
use crate::error::EngineError;
use crate::geometry::BlockPos;
use crate::instance::Instance;

/// Structure kinds and their relative weights
pub const STRUCTURE_KINDS: &[(&str, f64)] = &[
    ("floating_island", 0.08),
    ("crystal_formation", 0.06),
    ("ancient_platform", 0.05),
    ("void_bridge", 0.04),
    ("treasure_vault", 0.03),
    ("garden_sphere", 0.05),
    ("ruined_tower", 0.06),
    ("energy_core", 0.04),
    ("mining_outpost", 0.05),
    ("void_fortress", 0.03),
    ("crystal_garden", 0.05),
    ("nether_shard", 0.06),
];

const SITES_PER_SPACE: Range<usize> = 3..8;
const SITE_DISTANCE: Range<f64> = 100.0..200.0;
const SITE_HEIGHT: Range<i64> = 96..160;

/// Builds a structure in the backing world
pub trait StructurePlacer: Send + Sync {
    fn place(&self, kind: &'static str, at: BlockPos) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureSite {
    pub kind: &'static str,
    pub pos: BlockPos,
}

pub struct StructureSeeder {
    placer: Arc<dyn StructurePlacer>,
    territory_radius: u32,
    rng: Mutex<StdRng>,
    weights: Option<WeightedIndex<f64>>,
    seeded: DashSet<OwnerId>,
}

impl StructureSeeder {
    pub fn new(placer: Arc<dyn StructurePlacer>, territory_radius: u32) -> Self {
        Self::with_rng(placer, territory_radius, StdRng::from_entropy())
    }

    /// Deterministic seeder
    pub fn with_seed(placer: Arc<dyn StructurePlacer>, territory_radius: u32, seed: u64) -> Self {
        Self::with_rng(placer, territory_radius, StdRng::seed_from_u64(seed))
    }

    fn with_rng(placer: Arc<dyn StructurePlacer>, territory_radius: u32, rng: StdRng) -> Self {
        let weights = WeightedIndex::new(STRUCTURE_KINDS.iter().map(|(_, w)| *w)).ok();
        Self {
            placer,
            territory_radius,
            rng: Mutex::new(rng),
            weights,
            seeded: DashSet::new(),
        }
    }

    pub fn has_seeded(&self, owner: OwnerId) -> bool {
        self.seeded.contains(&owner)
    }

    /// Pick structure sites around a space; all lie inside its territory
    pub fn plan(&self, instance: &Instance) -> Vec<StructureSite> {
        let mut rng = self.rng.lock();
        let count = rng.gen_range(SITES_PER_SPACE);
        let mut sites = Vec::with_capacity(count);
        for _ in 0..count {
            let [dx, dz]: [f64; 2] = UnitCircle.sample(&mut *rng);
            let distance = rng.gen_range(SITE_DISTANCE);
            let pos = BlockPos::new(
                instance.center.x + (dx * distance).round() as i64,
                rng.gen_range(SITE_HEIGHT),
                instance.center.z + (dz * distance).round() as i64,
            );
            let pick = match &self.weights {
                Some(weights) => weights.sample(&mut *rng),
                None => rng.gen_range(0..STRUCTURE_KINDS.len()),
            };
            let kind = STRUCTURE_KINDS[pick].0;
            if instance.in_territory(pos, self.territory_radius) {
                sites.push(StructureSite { kind, pos });
            }
        }
        sites
    }
}

impl DimensionListener for StructureSeeder {
    fn on_instance_materialized(&self, instance: &Instance) {
        if !self.seeded.insert(instance.owner) {
            return;
        }
        let sites = self.plan(instance);
        debug!(owner = %instance.owner, count = sites.len(), "seeding structures");
        for site in sites {
            if let Err(e) = self.placer.place(site.kind, site.pos) {
                warn!(owner = %instance.owner, kind = site.kind, "structure placement failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::GridLayout;
    use crate::config::DimensionConfig;
    use crate::sandbox::SandboxWorld;
    use crate::world::PocketDimension;
    use chrono::{Duration, Utc};

    #[derive(Default)]
    struct Recording(Mutex<Vec<StructureSite>>);

    impl StructurePlacer for Recording {
        fn place(&self, kind: &'static str, at: BlockPos) -> Result<(), EngineError> {
            self.0.lock().push(StructureSite { kind, pos: at });
            Ok(())
        }
    }

    fn instance(index: u32) -> Instance {
        let layout = GridLayout::from_config(&DimensionConfig::default());
        Instance::new(OwnerId::from_u128(1), "a", index, &layout, Utc::now())
    }

    #[test]
    fn test_sites_stay_in_range() {
        let seeder = StructureSeeder::with_seed(Arc::new(Recording::default()), 400, 7);
        let inst = instance(12);
        for _ in 0..50 {
            let sites = seeder.plan(&inst);
            assert!(SITES_PER_SPACE.contains(&sites.len()));
            for site in sites {
                let dx = (site.pos.x - inst.center.x) as f64;
                let dz = (site.pos.z - inst.center.z) as f64;
                let distance = (dx * dx + dz * dz).sqrt();
                assert!((99.0..201.0).contains(&distance), "distance {distance}");
                assert!(SITE_HEIGHT.contains(&site.pos.y));
                assert!(inst.in_territory(site.pos, 400));
                assert!(STRUCTURE_KINDS.iter().any(|(k, _)| *k == site.kind));
            }
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let inst = instance(3);
        let a = StructureSeeder::with_seed(Arc::new(Recording::default()), 400, 99);
        let b = StructureSeeder::with_seed(Arc::new(Recording::default()), 400, 99);
        assert_eq!(a.plan(&inst), b.plan(&inst));
    }

    #[test]
    fn test_small_territory_filters_sites() {
        let seeder = StructureSeeder::with_seed(Arc::new(Recording::default()), 50, 1);
        assert!(seeder.plan(&instance(0)).is_empty());
    }

    #[test]
    fn test_seeds_once_on_materialization() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(DimensionConfig::default(), host).unwrap();
        let placer = Arc::new(Recording::default());
        let seeder = Arc::new(StructureSeeder::with_seed(placer.clone(), 400, 5));
        dim.add_listener(seeder.clone());

        let owner = OwnerId::from_u128(42);
        let now = Utc::now();
        let inst = dim.get_or_create(owner, "alice", now).unwrap();
        dim.tick(now + Duration::seconds(3));
        assert!(seeder.has_seeded(owner));
        let placed = placer.0.lock().len();
        assert!(SITES_PER_SPACE.contains(&placed));

        seeder.on_instance_materialized(&inst);
        assert_eq!(placer.0.lock().len(), placed);
    }
}
