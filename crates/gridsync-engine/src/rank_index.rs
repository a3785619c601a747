//! Per-pass rank buckets.
//!
//! Built once at init and read-only while passes run. Each pass that
//! at least one class participates in gets its own [`RankIndex`], so a
//! pass only visits objects whose class takes part in it.

use std::sync::Arc;

use gridsync_core::{Direction, Pass, Rank};
use gridsync_model::{ClassRegistry, ObjectStore, SimObject};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Objects bucketed by dependency rank.
#[derive(Debug, Default)]
pub struct RankIndex {
    buckets: Vec<Option<Vec<Arc<SimObject>>>>,
    first: Option<Rank>,
    last: Option<Rank>,
    len: usize,
}

impl RankIndex {
    /// Empty index with no buckets allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `obj` to the bucket for `rank`, doubling the bucket
    /// array until the rank fits.
    pub fn insert(&mut self, rank: Rank, obj: Arc<SimObject>) {
        let idx = rank.index();
        if idx >= self.buckets.len() {
            let mut cap = self.buckets.len().max(1);
            while cap <= idx {
                cap *= 2;
            }
            self.buckets.resize_with(cap, || None);
        }
        self.buckets[idx].get_or_insert_with(Vec::new).push(obj);
        self.first = Some(self.first.map_or(rank, |f| f.min(rank)));
        self.last = Some(self.last.map_or(rank, |l| l.max(rank)));
        self.len += 1;
    }

    /// Objects of one rank, in visiting order.
    pub fn bucket(&self, rank: Rank) -> &[Arc<SimObject>] {
        self.buckets
            .get(rank.index())
            .and_then(|b| b.as_deref())
            .unwrap_or(&[])
    }

    /// Lowest populated rank.
    pub fn first_rank(&self) -> Option<Rank> {
        self.first
    }

    /// Highest populated rank.
    pub fn last_rank(&self) -> Option<Rank> {
        self.last
    }

    /// Total number of indexed objects.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no object is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated bucket slots.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Randomize the order inside every bucket.
    pub fn shuffle(&mut self, rng: &mut ChaCha8Rng) {
        for bucket in self.buckets.iter_mut().flatten() {
            bucket.shuffle(rng);
        }
    }

    /// Populated ranks in `direction` order: ascending for bottom-up,
    /// descending for top-down.
    pub fn ranks(&self, direction: Direction) -> Vec<Rank> {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return Vec::new();
        };
        let populated = (first.0..=last.0)
            .map(Rank)
            .filter(|r| !self.bucket(*r).is_empty());
        match direction {
            Direction::BottomUp => populated.collect(),
            Direction::TopDown => {
                let mut v: Vec<Rank> = populated.collect();
                v.reverse();
                v
            }
        }
    }

    /// Every object, bucket by bucket in `direction` order.
    pub fn iter(&self, direction: Direction) -> impl Iterator<Item = &Arc<SimObject>> {
        self.ranks(direction)
            .into_iter()
            .flat_map(move |r| self.bucket(r).iter())
    }
}

/// One [`RankIndex`] per pass, plus one over every object.
#[derive(Debug, Default)]
pub struct PassIndexes {
    passes: [RankIndex; 3],
    all: RankIndex,
}

impl PassIndexes {
    /// Bucket every live object by its current rank.
    ///
    /// An object joins a pass index when its class's pass
    /// configuration includes that pass. With `shuffle_seed` set,
    /// bucket order is randomized reproducibly.
    pub fn build(
        registry: &ClassRegistry,
        store: &ObjectStore,
        shuffle_seed: Option<u64>,
    ) -> Self {
        let mut out = Self::default();
        for obj in store.iter() {
            let rank = obj.rank();
            let Some(class) = registry.get(obj.class()) else {
                continue;
            };
            let pc = class.passconfig();
            for pass in Pass::ALL {
                if pc.requires(pass) {
                    out.passes[pass.index()].insert(rank, Arc::clone(obj));
                }
            }
            out.all.insert(rank, Arc::clone(obj));
        }
        if let Some(seed) = shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for index in out.passes.iter_mut() {
                index.shuffle(&mut rng);
            }
        }
        debug!(
            objects = out.all.len(),
            pretopdown = out.passes[0].len(),
            bottomup = out.passes[1].len(),
            posttopdown = out.passes[2].len(),
            max_rank = out.all.last_rank().map_or(0, |r| r.0),
            "rank index built"
        );
        out
    }

    /// The index for one pass.
    pub fn pass(&self, pass: Pass) -> &RankIndex {
        &self.passes[pass.index()]
    }

    /// Every object regardless of pass participation.
    pub fn all(&self) -> &RankIndex {
        &self.all
    }
}
