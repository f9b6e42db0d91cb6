//! Reciprocal-rank fusion: the rule by which the dense (vector k-NN) and
//! lexical (FTS) channels are combined into a single ranked list. Named
//! after the fusion module in the retrieved hybrid-search reference —
//! RRF rather than min-max normalize-then-weight, because ranks fuse
//! cleanly across channels with very different raw score distributions.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// Standard RRF constant; dampens the influence of rank 1 vs rank 2.
    pub k: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

/// One channel's ranked candidate ids, best first.
pub type RankedIds<'a> = &'a [String];

/// Fuses any number of ranked channels into one RRF score per id:
/// `score(id) = sum over channels containing id of 1 / (k + rank)`,
/// `rank` being 1-based. Ids absent from a channel contribute nothing
/// from that channel. Returned map is unsorted; callers sort by score.
pub fn reciprocal_rank_fusion(channels: &[RankedIds<'_>], config: RrfConfig) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for channel in channels {
        for (idx, id) in channel.iter().enumerate() {
            let rank = idx + 1;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (config.k + rank as f64);
        }
    }
    scores
}

/// Fuses the vector and FTS channels and returns ids sorted by fused score
/// descending, ties broken by id ascending for determinism.
pub fn fuse_vector_and_fts(vector_ranked: &[String], fts_ranked: &[String], config: RrfConfig) -> Vec<(String, f64)> {
    let scores = reciprocal_rank_fusion(&[vector_ranked, fts_ranked], config);
    let mut merged: Vec<(String, f64)> = scores.into_iter().collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_present_in_both_channels_outranks_single_channel_hit() {
        let vector_ranked = vec!["a".to_string(), "b".to_string()];
        let fts_ranked = vec!["b".to_string(), "c".to_string()];
        let fused = fuse_vector_and_fts(&vector_ranked, &fts_ranked, RrfConfig::default());
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn empty_channels_yield_empty_result() {
        let fused = fuse_vector_and_fts(&[], &[], RrfConfig::default());
        assert!(fused.is_empty());
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let vector_ranked = vec!["z".to_string()];
        let fts_ranked = vec!["a".to_string()];
        let fused = fuse_vector_and_fts(&vector_ranked, &fts_ranked, RrfConfig::default());
        // both rank 1 in their own channel, same score -> id order decides
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused[1].0, "z");
    }
}
