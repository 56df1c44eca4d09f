//! Nearest-neighbor search over one generation's vectors.
//!
//! Small corpora are scanned exhaustively. Above `exact_threshold` vectors an
//! inverted-file partition is built: k-means centroids, one posting list per
//! centroid, and a query scans only the `n_probe` lists whose centroids are
//! closest. All vectors are unit-normalized up front so cosine similarity is a
//! dot product.

const KMEANS_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub enum AnnIndex {
    Flat,
    Ivf(IvfIndex),
}

#[derive(Debug, Clone)]
pub struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
    n_probe: usize,
}

impl AnnIndex {
    /// Build the search structure for `vectors` (already unit-normalized).
    pub fn build(vectors: &[Vec<f32>], exact_threshold: usize, n_probe: usize) -> Self {
        if vectors.len() <= exact_threshold {
            return AnnIndex::Flat;
        }
        AnnIndex::Ivf(IvfIndex::build(vectors, n_probe))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnnIndex::Flat => "flat",
            AnnIndex::Ivf(_) => "ivf",
        }
    }

    /// Top `k` `(position, score)` pairs, descending by score; ties keep
    /// position order.
    pub fn search(&self, vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || vectors.is_empty() {
            return Vec::new();
        }

        let query = normalized(query);
        let scored: Vec<(usize, f32)> = match self {
            AnnIndex::Flat => (0..vectors.len())
                .map(|i| (i, dot(&vectors[i], &query)))
                .collect(),
            AnnIndex::Ivf(ivf) => ivf
                .candidates(&query)
                .map(|i| (i, dot(&vectors[i], &query)))
                .collect(),
        };

        top_k(scored, k)
    }
}

impl IvfIndex {
    fn build(vectors: &[Vec<f32>], n_probe: usize) -> Self {
        let n = vectors.len();
        let n_lists = ((n as f64).sqrt().ceil() as usize).clamp(1, n);

        // Evenly spaced seeds keep the partition reproducible.
        let mut centroids: Vec<Vec<f32>> = (0..n_lists)
            .map(|c| vectors[c * n / n_lists].clone())
            .collect();
        let dims = vectors[0].len();
        let mut assignment = vec![usize::MAX; n];

        for _ in 0..KMEANS_ROUNDS {
            let mut moved = false;
            for (i, vector) in vectors.iter().enumerate() {
                let best = nearest(&centroids, vector);
                if best != assignment[i] {
                    assignment[i] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }

            let mut sums = vec![vec![0.0f32; dims]; n_lists];
            let mut counts = vec![0usize; n_lists];
            for (vector, &cluster) in vectors.iter().zip(&assignment) {
                counts[cluster] += 1;
                for (s, v) in sums[cluster].iter_mut().zip(vector) {
                    *s += v;
                }
            }

            for (c, sum) in sums.into_iter().enumerate() {
                // An empty cluster keeps its previous centroid.
                if counts[c] > 0 {
                    centroids[c] = normalized(&sum);
                }
            }
        }

        // Posting lists follow the final centroids.
        for (i, vector) in vectors.iter().enumerate() {
            assignment[i] = nearest(&centroids, vector);
        }

        let mut lists = vec![Vec::new(); n_lists];
        for (i, &cluster) in assignment.iter().enumerate() {
            lists[cluster].push(i);
        }

        Self {
            centroids,
            lists,
            n_probe: n_probe.clamp(1, n_lists),
        }
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    fn candidates<'a>(&'a self, query: &[f32]) -> impl Iterator<Item = usize> + 'a {
        let ranked = top_k(
            self.centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, dot(centroid, query)))
                .collect(),
            self.n_probe,
        );

        ranked
            .into_iter()
            .flat_map(move |(c, _)| self.lists[c].iter().copied())
    }
}

fn nearest(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.retain(|(_, score)| score.is_finite());
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length; the zero vector stays zero.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / norm).collect()
}
