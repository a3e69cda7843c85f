//! Structural properties of clustering over generated embeddings.

use std::collections::HashSet;
use std::sync::Arc;

use civicsim::clustering::{ClusteringEngine, DisjointSet};
use civicsim::{
    Collection, InMemoryRecordStore, InMemoryVectorStore, OwnerId, RecordFilter, RecordSummary,
    VectorStore, similarity,
};
use tokio_util::sync::CancellationToken;

const DIM: usize = 16;

/// Small deterministic generator so the fixtures need no extra crates.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }
}

struct Fixture {
    store: Arc<InMemoryVectorStore>,
    records: Arc<InMemoryRecordStore>,
    vectors: Vec<(OwnerId, Vec<f32>)>,
}

/// `groups` noisy copies around each of `centroids` random directions.
fn fixture(seed: u64, centroids: usize, groups: usize, noise: f32) -> Fixture {
    let mut rng = Lcg(seed);
    let store = Arc::new(InMemoryVectorStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let mut vectors = Vec::new();

    let mut next_id = 1;
    for c in 0..centroids {
        let centroid: Vec<f32> = (0..DIM).map(|_| rng.next_f32() - 0.5).collect();
        for _ in 0..groups {
            let vector: Vec<f32> = centroid
                .iter()
                .map(|x| x + (rng.next_f32() - 0.5) * noise)
                .collect();
            let id = OwnerId::new(next_id);
            next_id += 1;
            store.upsert(Collection::Issue, id, vector.clone()).unwrap();
            records.insert(
                Collection::Issue,
                RecordSummary::new(id, format!("Issue {id}"), "")
                    .with_status("reported")
                    .with_category(if c % 2 == 0 { "roads" } else { "lighting" }),
            );
            vectors.push((id, vector));
        }
    }

    Fixture {
        store,
        records,
        vectors,
    }
}

fn engine(fixture: &Fixture) -> ClusteringEngine {
    ClusteringEngine::new(fixture.store.clone(), fixture.records.clone())
}

#[test]
fn test_clusters_are_closed_and_disjoint() {
    for (seed, min) in [(1, 0.8), (7, 0.6), (42, 0.9), (1234, 0.5)] {
        let fixture = fixture(seed, 6, 5, 0.3);
        let clusters = engine(&fixture)
            .cluster(
                Collection::Issue,
                &RecordFilter::any(),
                min,
                &CancellationToken::new(),
            )
            .unwrap();

        let mut seen = HashSet::new();
        for cluster in &clusters {
            assert!(cluster.count >= 2);
            assert_eq!(cluster.count, cluster.members.len());
            assert!(cluster.members.windows(2).all(|w| w[0] < w[1]));
            for id in &cluster.members {
                assert!(seen.insert(*id), "{id} appears in two clusters");
            }
        }

        // Any qualifying pair must land in one cluster.
        for (a_id, a) in &fixture.vectors {
            for (b_id, b) in &fixture.vectors {
                if a_id < b_id && similarity(a, b).get() > min {
                    assert!(
                        clusters
                            .iter()
                            .any(|c| c.contains(*a_id) && c.contains(*b_id)),
                        "seed {seed}: {a_id} and {b_id} split"
                    );
                }
            }
        }

        // Every member has at least one qualifying neighbour inside its cluster.
        for cluster in &clusters {
            for id in &cluster.members {
                let (_, v) = fixture.vectors.iter().find(|(o, _)| o == id).unwrap();
                assert!(cluster.members.iter().any(|other| {
                    other != id && {
                        let (_, w) = fixture.vectors.iter().find(|(o, _)| o == other).unwrap();
                        similarity(v, w).get() > min
                    }
                }));
            }
        }

        assert!(
            clusters
                .windows(2)
                .all(|w| w[0].avg_similarity >= w[1].avg_similarity)
        );
    }
}

#[test]
fn test_average_lies_above_threshold() {
    let fixture = fixture(99, 4, 6, 0.2);
    let min = 0.7;
    let clusters = engine(&fixture)
        .cluster(
            Collection::Issue,
            &RecordFilter::any(),
            min,
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(!clusters.is_empty());
    for cluster in clusters {
        assert!(cluster.avg_similarity.get() > min);
        assert!(cluster.avg_similarity.get() <= 1.0);
    }
}

#[test]
fn test_results_do_not_depend_on_thread_count() {
    let fixture = fixture(5, 8, 4, 0.4);
    let cancel = CancellationToken::new();
    let filter = RecordFilter::any();

    let global = engine(&fixture)
        .cluster(Collection::Issue, &filter, 0.75, &cancel)
        .unwrap();
    for threads in [1, 3] {
        let dedicated = engine(&fixture)
            .with_threads(threads)
            .unwrap()
            .cluster(Collection::Issue, &filter, 0.75, &cancel)
            .unwrap();
        assert_eq!(global, dedicated);
    }
}

#[test]
fn test_by_category_never_mixes_categories() {
    let fixture = fixture(11, 6, 4, 0.3);
    let clusters = engine(&fixture)
        .cluster_by_category(
            Collection::Issue,
            &RecordFilter::any(),
            0.6,
            &CancellationToken::new(),
        )
        .unwrap();

    for cluster in &clusters {
        let category = cluster.category.clone().unwrap();
        for id in &cluster.members {
            let record = civicsim::RecordStore::get(&*fixture.records, Collection::Issue, *id)
                .unwrap()
                .unwrap();
            assert_eq!(record.category.as_deref(), Some(category.as_str()));
        }
    }
}

#[test]
fn test_raising_threshold_only_splits_clusters() {
    let fixture = fixture(21, 5, 5, 0.5);
    let run = |min: f32| {
        engine(&fixture)
            .cluster(
                Collection::Issue,
                &RecordFilter::any(),
                min,
                &CancellationToken::new(),
            )
            .unwrap()
    };
    let loose = run(0.5);
    let strict = run(0.85);

    for cluster in &strict {
        assert!(
            loose
                .iter()
                .any(|c| cluster.members.iter().all(|id| c.contains(*id)))
        );
    }
}

#[test]
fn test_disjoint_set_matches_naive_components() {
    let mut rng = Lcg(3);
    let n = 40;
    let pairs: Vec<(usize, usize)> = (0..30)
        .map(|_| {
            let a = (rng.next_f32() * n as f32) as usize % n;
            let b = (rng.next_f32() * n as f32) as usize % n;
            (a, b)
        })
        .collect();

    let mut set = DisjointSet::new(n);
    for (a, b) in &pairs {
        set.union(*a, *b);
    }

    // Naive labelling: relabel until no pair disagrees.
    let mut label: Vec<usize> = (0..n).collect();
    loop {
        let mut changed = false;
        for (a, b) in &pairs {
            let low = label[*a].min(label[*b]);
            if label[*a] != low || label[*b] != low {
                label[*a] = low;
                label[*b] = low;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for a in 0..n {
        for b in 0..n {
            assert_eq!(set.connected(a, b), label[a] == label[b], "{a} {b}");
        }
    }
}
