// =============================================================================
// Behavioral Clusterer — 9D features -> 2D layout -> density clusters
// =============================================================================
//
// Runs on its own slow cadence over the fingerprint feature vectors:
//
//   1. Min-max normalize each of the 9 dimensions.
//   2. Build a k-nearest-neighbour graph with fuzzy-set edge weights
//      (a simplified UMAP, adequate for N up to ~50 bots).
//   3. Force-directed 2D layout driven by that graph, seeded from a ChaCha
//      generator so a fixed seed reproduces a fixed embedding.
//   4. Cluster the 2D points with a simplified HDBSCAN: minimum spanning
//      tree over mutual-reachability distances, cutting edges above
//      mean + 0.5·stddev of the MST edge weights. Components below the
//      minimum cluster size are labelled noise.
//
// Each pass fully replaces the previous result; no incremental update.
// =============================================================================

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::observation::fingerprint::{FEATURE_DIMS, FEATURE_LABELS};

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub k_neighbors: usize,
    pub layout_iterations: usize,
    /// min cluster size ≈ N / divisor, floored at 2.
    pub min_cluster_divisor: usize,
    /// Core-distance depth for mutual reachability.
    pub min_samples: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 4,
            layout_iterations: 200,
            min_cluster_divisor: 7,
            min_samples: 3,
            seed: 0x6d65_7269,
        }
    }
}

/// One dense region of behavior space.
#[derive(Debug, Clone, Serialize)]
pub struct BehaviorCluster {
    pub id: usize,
    pub members: Vec<String>,
    pub centroid: (f64, f64),
    /// Max member distance to the centroid in the 2D embedding.
    pub radius: f64,
    /// Synthesized from the two strongest mean feature magnitudes, e.g.
    /// "Aggressive-Contrarian".
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ClusteringResult {
    pub clusters: Vec<BehaviorCluster>,
    pub noise: Vec<String>,
    pub silhouette: f64,
    /// 2D embedding per bot, for dashboards.
    pub positions: HashMap<String, (f64, f64)>,
}

/// Cluster the given (bot id, feature vector) rows. Deterministic for a
/// fixed config.
pub fn cluster_bots(
    rows: &[(String, [f64; FEATURE_DIMS])],
    config: &ClusterConfig,
) -> ClusteringResult {
    let n = rows.len();
    if n < 2 {
        return ClusteringResult {
            noise: rows.iter().map(|(id, _)| id.clone()).collect(),
            ..Default::default()
        };
    }

    let features = normalize(rows);
    let graph = fuzzy_knn_graph(&features, config.k_neighbors.min(n - 1));
    let positions = force_layout(&features, &graph, config);

    let assignments = mst_clusters(&positions, config, n);

    build_result(rows, &features, &positions, &assignments)
}

// -----------------------------------------------------------------------------
// Normalization
// -----------------------------------------------------------------------------

/// Per-dimension min-max scaling into [0, 1]. A dimension with no spread
/// parks at 0.5 so it cannot dominate distances.
fn normalize(rows: &[(String, [f64; FEATURE_DIMS])]) -> Vec<[f64; FEATURE_DIMS]> {
    let mut mins = [f64::MAX; FEATURE_DIMS];
    let mut maxs = [f64::MIN; FEATURE_DIMS];
    for (_, v) in rows {
        for d in 0..FEATURE_DIMS {
            mins[d] = mins[d].min(v[d]);
            maxs[d] = maxs[d].max(v[d]);
        }
    }

    rows.iter()
        .map(|(_, v)| {
            let mut out = [0.5; FEATURE_DIMS];
            for d in 0..FEATURE_DIMS {
                let range = maxs[d] - mins[d];
                if range > 1e-12 {
                    out[d] = (v[d] - mins[d]) / range;
                }
            }
            out
        })
        .collect()
}

fn dist9(a: &[f64; FEATURE_DIMS], b: &[f64; FEATURE_DIMS]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

// -----------------------------------------------------------------------------
// Fuzzy kNN graph
// -----------------------------------------------------------------------------

/// Symmetrized fuzzy edge weights: per point, weights decay exponentially
/// beyond the nearest neighbour, scaled by the local kNN radius; the
/// directed weights combine with the probabilistic t-conorm.
fn fuzzy_knn_graph(features: &[[f64; FEATURE_DIMS]], k: usize) -> Vec<Vec<f64>> {
    let n = features.len();
    let mut directed = vec![vec![0.0; n]; n];

    for i in 0..n {
        let mut dists: Vec<(usize, f64)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (j, dist9(&features[i], &features[j])))
            .collect();
        dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let neighbors = &dists[..k.min(dists.len())];
        let rho = neighbors.first().map(|(_, d)| *d).unwrap_or(0.0);
        let sigma = (neighbors.iter().map(|(_, d)| d).sum::<f64>()
            / neighbors.len().max(1) as f64)
            .max(1e-9);

        for &(j, d) in neighbors {
            directed[i][j] = (-(d - rho).max(0.0) / sigma).exp();
        }
    }

    let mut graph = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let a = directed[i][j];
            let b = directed[j][i];
            let w = a + b - a * b;
            graph[i][j] = w;
            graph[j][i] = w;
        }
    }
    graph
}

// -----------------------------------------------------------------------------
// Force-directed layout
// -----------------------------------------------------------------------------

/// 2D embedding: neighbours attract along their edge weight, everything
/// repels weakly. Deterministic for a fixed seed.
fn force_layout(
    features: &[[f64; FEATURE_DIMS]],
    graph: &[Vec<f64>],
    config: &ClusterConfig,
) -> Vec<(f64, f64)> {
    let n = features.len();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut pos: Vec<(f64, f64)> = (0..n)
        .map(|_| (rng.gen::<f64>(), rng.gen::<f64>()))
        .collect();

    const IDEAL_EDGE: f64 = 0.1;
    const REPULSION: f64 = 0.002;

    for it in 0..config.layout_iterations {
        let lr = 0.1 * (1.0 - it as f64 / config.layout_iterations as f64);

        for i in 0..n {
            for j in (i + 1)..n {
                let dx = pos[j].0 - pos[i].0;
                let dy = pos[j].1 - pos[i].1;
                let d = (dx * dx + dy * dy).sqrt().max(1e-6);
                let (ux, uy) = (dx / d, dy / d);

                // Attraction along graph edges toward the ideal length.
                let w = graph[i][j];
                let mut force = if w > 0.0 { w * (d - IDEAL_EDGE) } else { 0.0 };
                // Universal repulsion.
                force -= REPULSION / (d * d + 1e-3);

                let shift = lr * force / 2.0;
                pos[i].0 += ux * shift;
                pos[i].1 += uy * shift;
                pos[j].0 -= ux * shift;
                pos[j].1 -= uy * shift;
            }
        }
    }
    pos
}

// -----------------------------------------------------------------------------
// MST clustering over mutual reachability
// -----------------------------------------------------------------------------

fn dist2(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Cluster assignment per point; `None` marks noise.
fn mst_clusters(
    positions: &[(f64, f64)],
    config: &ClusterConfig,
    n: usize,
) -> Vec<Option<usize>> {
    // Core distance: distance to the min_samples-th nearest neighbour.
    let core: Vec<f64> = (0..n)
        .map(|i| {
            let mut d: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| dist2(positions[i], positions[j]))
                .collect();
            d.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let depth = config.min_samples.min(d.len()).saturating_sub(1);
            d.get(depth).copied().unwrap_or(0.0)
        })
        .collect();

    let mutual_reach =
        |i: usize, j: usize| dist2(positions[i], positions[j]).max(core[i]).max(core[j]);

    // Prim's MST.
    let mut in_tree = vec![false; n];
    let mut best = vec![(f64::MAX, usize::MAX); n]; // (weight, parent)
    in_tree[0] = true;
    for j in 1..n {
        best[j] = (mutual_reach(0, j), 0);
    }

    let mut edges: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);
    for _ in 1..n {
        let (next, &(w, parent)) = best
            .iter()
            .enumerate()
            .filter(|(i, _)| !in_tree[*i])
            .min_by(|a, b| {
                a.1 .0
                    .partial_cmp(&b.1 .0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("some node remains outside the tree");

        in_tree[next] = true;
        edges.push((parent, next, w));
        for j in 0..n {
            if !in_tree[j] {
                let d = mutual_reach(next, j);
                if d < best[j].0 {
                    best[j] = (d, next);
                }
            }
        }
    }

    // Cut edges above mean + 0.5·stddev.
    let mean = edges.iter().map(|e| e.2).sum::<f64>() / edges.len() as f64;
    let var = edges.iter().map(|e| (e.2 - mean).powi(2)).sum::<f64>() / edges.len() as f64;
    let cut = mean + 0.5 * var.sqrt();

    let mut uf = UnionFind::new(n);
    for &(a, b, w) in &edges {
        if w <= cut {
            uf.union(a, b);
        }
    }

    // Components below the size floor are noise.
    let min_cluster_size = (n / config.min_cluster_divisor).max(2);
    let mut component_size: HashMap<usize, usize> = HashMap::new();
    for i in 0..n {
        *component_size.entry(uf.find(i)).or_insert(0) += 1;
    }

    // Stable cluster ids in first-seen order.
    let mut cluster_ids: HashMap<usize, usize> = HashMap::new();
    let mut assignments = vec![None; n];
    for i in 0..n {
        let root = uf.find(i);
        if component_size[&root] < min_cluster_size {
            continue;
        }
        let next_id = cluster_ids.len();
        let id = *cluster_ids.entry(root).or_insert(next_id);
        assignments[i] = Some(id);
    }
    assignments
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

// -----------------------------------------------------------------------------
// Result assembly
// -----------------------------------------------------------------------------

fn build_result(
    rows: &[(String, [f64; FEATURE_DIMS])],
    features: &[[f64; FEATURE_DIMS]],
    positions: &[(f64, f64)],
    assignments: &[Option<usize>],
) -> ClusteringResult {
    let n = rows.len();
    let cluster_count = assignments.iter().flatten().max().map_or(0, |m| m + 1);

    let mut clusters = Vec::with_capacity(cluster_count);
    for id in 0..cluster_count {
        let member_idx: Vec<usize> = (0..n).filter(|&i| assignments[i] == Some(id)).collect();

        let cx = member_idx.iter().map(|&i| positions[i].0).sum::<f64>()
            / member_idx.len() as f64;
        let cy = member_idx.iter().map(|&i| positions[i].1).sum::<f64>()
            / member_idx.len() as f64;
        let radius = member_idx
            .iter()
            .map(|&i| dist2(positions[i], (cx, cy)))
            .fold(0.0, f64::max);

        clusters.push(BehaviorCluster {
            id,
            members: member_idx.iter().map(|&i| rows[i].0.clone()).collect(),
            centroid: (cx, cy),
            radius,
            label: dominant_label(&member_idx, features),
        });
    }

    let noise = (0..n)
        .filter(|&i| assignments[i].is_none())
        .map(|i| rows[i].0.clone())
        .collect();

    let positions_by_bot = rows
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.clone(), positions[i]))
        .collect();

    ClusteringResult {
        silhouette: silhouette(positions, assignments, cluster_count),
        clusters,
        noise,
        positions: positions_by_bot,
    }
}

/// "Aggressive-Contrarian"-style label from the two strongest mean feature
/// magnitudes of the cluster.
fn dominant_label(member_idx: &[usize], features: &[[f64; FEATURE_DIMS]]) -> String {
    let mut means = [0.0; FEATURE_DIMS];
    for &i in member_idx {
        for d in 0..FEATURE_DIMS {
            means[d] += features[i][d];
        }
    }
    for m in &mut means {
        *m /= member_idx.len() as f64;
    }

    let mut order: Vec<usize> = (0..FEATURE_DIMS).collect();
    order.sort_by(|&a, &b| {
        means[b]
            .partial_cmp(&means[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    format!("{}-{}", FEATURE_LABELS[order[0]], FEATURE_LABELS[order[1]])
}

/// Mean silhouette over clustered points in the 2D embedding; 0 when fewer
/// than two clusters exist.
fn silhouette(
    positions: &[(f64, f64)],
    assignments: &[Option<usize>],
    cluster_count: usize,
) -> f64 {
    if cluster_count < 2 {
        return 0.0;
    }
    let n = positions.len();

    let mut scores = Vec::new();
    for i in 0..n {
        let own = match assignments[i] {
            Some(c) => c,
            None => continue,
        };

        let mut intra = Vec::new();
        let mut inter: HashMap<usize, Vec<f64>> = HashMap::new();
        for j in 0..n {
            if i == j {
                continue;
            }
            match assignments[j] {
                Some(c) if c == own => intra.push(dist2(positions[i], positions[j])),
                Some(c) => inter.entry(c).or_default().push(dist2(positions[i], positions[j])),
                None => {}
            }
        }
        if intra.is_empty() || inter.is_empty() {
            continue;
        }

        let a = intra.iter().sum::<f64>() / intra.len() as f64;
        let b = inter
            .values()
            .map(|d| d.iter().sum::<f64>() / d.len() as f64)
            .fold(f64::MAX, f64::min);
        scores.push((b - a) / a.max(b).max(1e-12));
    }

    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well-separated behavioral archetypes plus jitter.
    fn two_blob_rows(per_blob: usize) -> Vec<(String, [f64; FEATURE_DIMS])> {
        let mut rows = Vec::new();
        for i in 0..per_blob {
            // Aggressive momentum buyers.
            let j = (i as f64) * 0.01;
            rows.push((
                format!("momo-{i}"),
                [0.7 + j, 3.0, 1.8, 0.8, 0.1, 0.8, 0.9, 1.5, 0.2 + j],
            ));
            // Patient contrarians.
            rows.push((
                format!("fade-{i}"),
                [0.5 + j, 1.2, 0.2, 0.4, 0.9, -0.7, 0.3, 0.1, 1.4 + j],
            ));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    #[test]
    fn identical_inputs_produce_identical_clusterings() {
        // Fifteen fingerprints, fixed seed, two passes.
        let rows: Vec<(String, [f64; FEATURE_DIMS])> = (0..15)
            .map(|i| {
                let f = i as f64;
                (
                    format!("bot-{i:02}"),
                    [
                        0.3 + 0.04 * f,
                        1.0 + 0.2 * (f % 5.0),
                        (f % 3.0) * 0.6,
                        0.5,
                        0.1 * (f % 7.0),
                        0.2 * ((f % 4.0) - 2.0),
                        0.5 + 0.03 * f,
                        0.5 * (f % 2.0),
                        0.4 + 0.1 * (f % 6.0),
                    ],
                )
            })
            .collect();

        let config = ClusterConfig::default();
        let a = cluster_bots(&rows, &config);
        let b = cluster_bots(&rows, &config);

        let membership = |r: &ClusteringResult| -> Vec<Vec<String>> {
            r.clusters.iter().map(|c| c.members.clone()).collect()
        };
        assert_eq!(membership(&a), membership(&b));
        assert_eq!(a.noise, b.noise);
        assert!((a.silhouette - b.silhouette).abs() < 1e-12);
    }

    #[test]
    fn separated_archetypes_land_in_different_clusters() {
        let rows = two_blob_rows(6);
        let result = cluster_bots(&rows, &ClusterConfig::default());

        assert!(
            result.clusters.len() >= 2,
            "expected at least two clusters, got {}",
            result.clusters.len()
        );

        // No cluster mixes the archetypes.
        for cluster in &result.clusters {
            let momo = cluster.members.iter().filter(|m| m.starts_with("momo")).count();
            let fade = cluster.members.iter().filter(|m| m.starts_with("fade")).count();
            assert!(
                momo == 0 || fade == 0,
                "cluster {} mixes archetypes: {:?}",
                cluster.id,
                cluster.members
            );
        }
    }

    #[test]
    fn well_separated_blobs_score_positive_silhouette() {
        let rows = two_blob_rows(6);
        let result = cluster_bots(&rows, &ClusterConfig::default());
        if result.clusters.len() >= 2 {
            assert!(
                result.silhouette > 0.0,
                "silhouette {} for clean blobs",
                result.silhouette
            );
        }
    }

    #[test]
    fn tiny_inputs_are_all_noise() {
        let rows = vec![("solo".to_string(), [0.5; FEATURE_DIMS])];
        let result = cluster_bots(&rows, &ClusterConfig::default());
        assert!(result.clusters.is_empty());
        assert_eq!(result.noise, vec!["solo".to_string()]);
        assert_eq!(cluster_bots(&[], &ClusterConfig::default()).clusters.len(), 0);
    }

    #[test]
    fn clusters_carry_centroid_radius_and_label() {
        let rows = two_blob_rows(6);
        let result = cluster_bots(&rows, &ClusterConfig::default());

        for cluster in &result.clusters {
            assert!(!cluster.members.is_empty());
            assert!(cluster.radius >= 0.0);
            // Label is "Axis-Axis" from the feature vocabulary.
            let parts: Vec<&str> = cluster.label.split('-').collect();
            assert_eq!(parts.len(), 2);
            assert!(FEATURE_LABELS.contains(&parts[0]));
            assert!(FEATURE_LABELS.contains(&parts[1]));
            assert_ne!(parts[0], parts[1]);
        }
    }

    #[test]
    fn every_bot_gets_a_position() {
        let rows = two_blob_rows(5);
        let result = cluster_bots(&rows, &ClusterConfig::default());
        assert_eq!(result.positions.len(), rows.len());
    }

    #[test]
    fn normalize_handles_flat_dimensions() {
        let rows = vec![
            ("a".to_string(), [1.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            ("b".to_string(), [3.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ];
        let normed = normalize(&rows);
        assert!((normed[0][0] - 0.0).abs() < 1e-12);
        assert!((normed[1][0] - 1.0).abs() < 1e-12);
        // Flat dimension parks at 0.5 for everyone.
        assert!((normed[0][1] - 0.5).abs() < 1e-12);
        assert!((normed[1][1] - 0.5).abs() < 1e-12);
    }
}
