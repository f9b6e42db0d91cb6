//! In-process approximate vector index, since SQLite has no native ANN
//! index. Implements the adaptive exact / IVF-Flat / IVF-PQ policy from
//! §4.3 as a best-effort layer over brute-force cosine scan: any build
//! failure degrades to exact search with a logged warning, never to a
//! failed query.
//!
//! IVF-PQ is approximated as IVF-Flat with the configured sub-vector
//! count carried only as metadata — training real product-quantization
//! codebooks is out of scope for a pure-Rust, dependency-aligned index;
//! see DESIGN.md.

use crate::embedding::cosine_similarity;
use crate::store::IndexKind;
use tracing::warn;

struct Partition {
    centroid: Vec<f32>,
    members: Vec<usize>,
}

/// An index over one table's current vector set. Rebuilt wholesale on
/// row-count threshold crossings; cheap to throw away and rebuild since
/// it holds no state beyond partition assignments.
pub struct IvfIndex {
    kind: IndexKind,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    partitions: Vec<Partition>,
}

impl IvfIndex {
    /// Builds the index appropriate for `kind`. `Exact` carries zero
    /// partitions; `search` notices and falls back to a full scan.
    pub fn build(rows: Vec<(String, Vec<f32>)>, kind: IndexKind) -> Self {
        let (ids, vectors): (Vec<String>, Vec<Vec<f32>>) = rows.into_iter().unzip();

        let partitions = match kind {
            IndexKind::Exact => Vec::new(),
            IndexKind::IvfFlat { num_partitions } | IndexKind::IvfPq { num_partitions, .. } => {
                match build_partitions(&vectors, num_partitions) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("IVF partition build failed, falling back to exact search: {e}");
                        Vec::new()
                    }
                }
            }
        };

        Self { kind, ids, vectors, partitions }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns up to `top_k` (id, cosine similarity) pairs, best first.
    /// Probes the `nprobe` nearest partitions when partitioned; scans
    /// everything when the index degraded to exact.
    pub fn search(&self, query: &[f32], top_k: usize, nprobe: usize) -> Vec<(String, f32)> {
        if self.partitions.is_empty() {
            return self.brute_force(query, top_k);
        }

        let mut ranked_partitions: Vec<(usize, f32)> = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (i, cosine_similarity(query, &p.centroid)))
            .collect();
        ranked_partitions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut candidates: Vec<(String, f32)> = Vec::new();
        for (partition_idx, _) in ranked_partitions.into_iter().take(nprobe.max(1)) {
            for &member in &self.partitions[partition_idx].members {
                let score = cosine_similarity(query, &self.vectors[member]);
                candidates.push((self.ids[member].clone(), score));
            }
        }
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);
        candidates
    }

    fn brute_force(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// One lightweight Lloyd's-algorithm pass: seed centroids from evenly
/// spaced vectors, assign, recompute, repeat a fixed small number of
/// iterations. Good enough for partition locality, not a tuned k-means.
fn build_partitions(vectors: &[Vec<f32>], num_partitions: usize) -> anyhow::Result<Vec<Partition>> {
    if vectors.is_empty() {
        anyhow::bail!("cannot build an index over zero vectors");
    }
    let dims = vectors[0].len();
    if dims == 0 {
        anyhow::bail!("cannot build an index over zero-dimensional vectors");
    }

    let num_partitions = num_partitions.min(vectors.len()).max(1);
    let stride = vectors.len() / num_partitions;
    let mut centroids: Vec<Vec<f32>> = (0..num_partitions)
        .map(|i| vectors[(i * stride).min(vectors.len() - 1)].clone())
        .collect();

    const ITERATIONS: usize = 4;
    let mut assignment = vec![0usize; vectors.len()];

    for _ in 0..ITERATIONS {
        for (i, v) in vectors.iter().enumerate() {
            let mut best = 0usize;
            let mut best_sim = f32::MIN;
            for (c, centroid) in centroids.iter().enumerate() {
                let sim = cosine_similarity(v, centroid);
                if sim > best_sim {
                    best_sim = sim;
                    best = c;
                }
            }
            assignment[i] = best;
        }

        let mut sums = vec![vec![0f32; dims]; num_partitions];
        let mut counts = vec![0usize; num_partitions];
        for (i, v) in vectors.iter().enumerate() {
            let p = assignment[i];
            counts[p] += 1;
            for (d, value) in v.iter().enumerate() {
                sums[p][d] += value;
            }
        }
        for p in 0..num_partitions {
            if counts[p] == 0 {
                continue;
            }
            for d in 0..dims {
                centroids[p][d] = sums[p][d] / counts[p] as f32;
            }
        }
    }

    let mut partitions: Vec<Partition> = centroids
        .into_iter()
        .map(|centroid| Partition { centroid, members: Vec::new() })
        .collect();
    for (i, &p) in assignment.iter().enumerate() {
        partitions[p].members.push(i);
    }

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize, dims: usize) -> Vec<(String, Vec<f32>)> {
        (0..n)
            .map(|i| {
                let mut v = vec![0.0f32; dims];
                v[i % dims] = 1.0;
                (format!("id-{i}"), v)
            })
            .collect()
    }

    #[test]
    fn exact_index_is_a_brute_force_scan() {
        let index = IvfIndex::build(rows(10, 4), IndexKind::Exact);
        let query = vec![1.0, 0.0, 0.0, 0.0];
        let hits = index.search(&query, 3, 1);
        assert_eq!(hits.len(), 3);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn ivf_flat_returns_requested_count() {
        let index = IvfIndex::build(rows(200, 8), IndexKind::IvfFlat { num_partitions: 4 });
        let query = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let hits = index.search(&query, 5, 4);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn single_zero_dim_vector_falls_back_without_panicking() {
        let index = IvfIndex::build(vec![("a".to_string(), vec![])], IndexKind::IvfFlat { num_partitions: 2 });
        let hits = index.search(&[], 1, 1);
        assert!(hits.is_empty() || hits[0].1 == 0.0);
    }
}
