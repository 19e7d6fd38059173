//! Maximal marginal relevance re-ranking.
//!
//! score = λ × relevance(query, doc) − (1 − λ) × max similarity(doc, already selected)
//!
//! Relevance is the inner product with the query, matching the collection metric;
//! redundancy between documents is their cosine similarity.

#[derive(Debug, Clone, Copy)]
pub struct MmrConfig {
    /// 1.0 = pure relevance, 0.0 = pure diversity.
    pub lambda: f32,
    /// Candidates fetched per requested result.
    pub fetch_multiplier: usize,
    /// Lower bound on fetched candidates.
    pub min_fetch: usize,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            lambda: 0.5,
            fetch_multiplier: 4,
            min_fetch: 20,
        }
    }
}

impl MmrConfig {
    pub fn fetch_k(&self, k: usize) -> usize {
        k.saturating_mul(self.fetch_multiplier).max(self.min_fetch).max(k)
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let magnitude = dot(left, left).sqrt() * dot(right, right).sqrt();
    if magnitude == 0.0 {
        0.0
    } else {
        dot(left, right) / magnitude
    }
}

/// Indices into `candidates`, in selection order, at most `k` of them.
pub fn mmr_select(query: &[f32], candidates: &[Vec<f32>], k: usize, lambda: f32) -> Vec<usize> {
    let lambda = lambda.clamp(0.0, 1.0);
    let relevance: Vec<f32> = candidates.iter().map(|vector| dot(query, vector)).collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_position = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (position, &candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&chosen| cosine_similarity(&candidates[candidate], &candidates[chosen]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda * relevance[candidate] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }

        selected.push(remaining.remove(best_position));
    }

    selected
}
