/// A pairing between a reading point and a reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index of the point in the reading cloud.
    pub reading: usize,
    /// Index of the matched point in the reference cloud.
    pub reference: usize,
    /// Euclidean distance between the two points.
    pub distance: f64,
    /// Confidence of the match, `0` excludes it from the minimizer.
    pub weight: f64,
}

impl Correspondence {
    /// Whether the match contributes to the minimization.
    pub fn is_valid(&self) -> bool {
        self.weight > 0.0
    }
}

/// The matches of one iteration, `knn` entries per reading point.
///
/// Entries are ordered by reading point, then by neighbor rank. Outlier
/// filters only change weights, never the number or order of entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    knn: usize,
    entries: Vec<Correspondence>,
}

impl CorrespondenceSet {
    /// Create a set from its entries.
    pub fn new(knn: usize, entries: Vec<Correspondence>) -> Self {
        Self { knn, entries }
    }

    /// Number of neighbors requested per reading point.
    pub fn knn(&self) -> usize {
        self.knn
    }

    /// Number of entries, valid or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries.
    pub fn entries(&self) -> &[Correspondence] {
        &self.entries
    }

    /// Entries with a strictly positive weight.
    pub fn valid(&self) -> impl Iterator<Item = &Correspondence> {
        self.entries.iter().filter(|c| c.is_valid())
    }

    /// Number of entries with a strictly positive weight.
    pub fn num_valid(&self) -> usize {
        self.valid().count()
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> f64 {
        self.valid().map(|c| c.weight).sum()
    }

    /// Multiply each weight by the factor returned for its entry.
    ///
    /// Negative or non-finite factors exclude the entry.
    pub fn scale_weights(&mut self, mut factor: impl FnMut(&Correspondence) -> f64) {
        for c in self.entries.iter_mut() {
            let f = factor(c);
            c.weight = if f.is_finite() && f > 0.0 { c.weight * f } else { 0.0 };
        }
    }

    /// Distances of the valid entries.
    pub fn valid_distances(&self) -> Vec<f64> {
        self.valid().map(|c| c.distance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reading: usize, distance: f64, weight: f64) -> Correspondence {
        Correspondence {
            reading,
            reference: reading,
            distance,
            weight,
        }
    }

    #[test]
    fn test_scale_weights_keeps_size() {
        let mut set = CorrespondenceSet::new(
            1,
            vec![entry(0, 0.1, 1.0), entry(1, 0.5, 1.0), entry(2, 2.0, 0.0)],
        );
        assert_eq!(set.num_valid(), 2);

        set.scale_weights(|c| if c.distance < 1.0 { 0.5 } else { 1.0 });
        assert_eq!(set.len(), 3);
        assert_eq!(set.entries()[0].weight, 0.5);
        assert_eq!(set.entries()[2].weight, 0.0);
        assert_eq!(set.total_weight(), 1.0);

        set.scale_weights(|c| if c.reading == 1 { f64::NAN } else { 1.0 });
        assert_eq!(set.num_valid(), 1);
        assert_eq!(set.valid_distances(), vec![0.1]);
    }
}
