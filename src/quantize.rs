//! K-means palette quantization over Lab pixels.
//!
//! Given the same pixels, k, seed and iteration cap the output is
//! bitwise-reproducible: centroid initialization draws indices from the
//! seeded stream, the assignment step is an order-preserving map, and
//! accumulation runs sequentially.

use crate::color::{self, LabColor};
use crate::error::{BlueprintError, Result};
use crate::rng::SeededRng;
use rayon::prelude::*;
use std::collections::HashSet;

pub const DEFAULT_MAX_ITERATIONS: usize = 20;

#[derive(Debug, Clone)]
pub struct Quantization {
    pub centroids: Vec<LabColor>,
    pub labels: Vec<u32>,
}

/// Running mean accumulator for one cluster.
struct Center {
    lab: LabColor,
    sum_l: f64,
    sum_a: f64,
    sum_b: f64,
    count: u64,
}

impl Center {
    fn new(lab: LabColor) -> Self {
        Self {
            lab,
            sum_l: 0.0,
            sum_a: 0.0,
            sum_b: 0.0,
            count: 0,
        }
    }

    fn add_sample(&mut self, lab: LabColor) {
        self.sum_l += lab.l;
        self.sum_a += lab.a;
        self.sum_b += lab.b;
        self.count += 1;
    }

    /// Recompute the centroid as the mean of assigned samples. A cluster
    /// with zero assignments keeps its previous value.
    fn update_centroid(&mut self) {
        if self.count > 0 {
            self.lab = LabColor::new(
                self.sum_l / self.count as f64,
                self.sum_a / self.count as f64,
                self.sum_b / self.count as f64,
            );
        }
        self.sum_l = 0.0;
        self.sum_a = 0.0;
        self.sum_b = 0.0;
        self.count = 0;
    }
}

/// Quantize `pixels` to at most `k` Lab centroids.
pub fn kmeans(
    pixels: &[LabColor],
    k: usize,
    rng: &mut SeededRng,
    max_iterations: usize,
) -> Result<Quantization> {
    if k == 0 {
        return Err(BlueprintError::invalid_parameter(
            "palette_size",
            "must be at least 1",
        ));
    }

    let n = pixels.len();
    if k >= n {
        return Ok(Quantization {
            centroids: pixels.to_vec(),
            labels: (0..n as u32).collect(),
        });
    }

    // Draw distinct pixel indices from the seeded stream. With k < n the
    // pool cannot run dry before k uniques are collected.
    let mut seen = HashSet::with_capacity(k);
    let mut centers = Vec::with_capacity(k);
    while centers.len() < k {
        let idx = rng.next_index(n);
        if seen.insert(idx) {
            centers.push(Center::new(pixels[idx]));
        }
    }

    let mut labels: Option<Vec<u32>> = None;
    for _ in 0..max_iterations.max(1) {
        let centroids: Vec<LabColor> = centers.iter().map(|c| c.lab).collect();

        // Assignment: nearest centroid under CIE76, ties to the lowest index.
        let new_labels: Vec<u32> = pixels
            .par_iter()
            .map(|pixel| {
                let mut best_idx = 0u32;
                let mut best_dist = f64::MAX;
                for (i, centroid) in centroids.iter().enumerate() {
                    let dist = color::delta_e_76(*pixel, *centroid);
                    if dist < best_dist {
                        best_dist = dist;
                        best_idx = i as u32;
                    }
                }
                best_idx
            })
            .collect();

        if labels.as_ref() == Some(&new_labels) {
            break;
        }

        for (pixel, &label) in pixels.iter().zip(new_labels.iter()) {
            centers[label as usize].add_sample(*pixel);
        }
        for center in &mut centers {
            center.update_centroid();
        }

        labels = Some(new_labels);
    }

    let labels = labels.unwrap_or_default();
    Ok(Quantization {
        centroids: centers.into_iter().map(|c| c.lab).collect(),
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::srgb_to_lab;

    fn solid(rgb: [u8; 3], n: usize) -> Vec<LabColor> {
        vec![srgb_to_lab(rgb); n]
    }

    #[test]
    fn zero_k_is_rejected() {
        let mut rng = SeededRng::new(42);
        assert!(matches!(
            kmeans(&solid([10, 10, 10], 4), 0, &mut rng, 20),
            Err(BlueprintError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn k_at_least_n_returns_identity() {
        let mut rng = SeededRng::new(42);
        let pixels = vec![
            srgb_to_lab([255, 0, 0]),
            srgb_to_lab([0, 255, 0]),
            srgb_to_lab([0, 0, 255]),
        ];
        let q = kmeans(&pixels, 5, &mut rng, 20).expect("quantize");
        assert_eq!(q.labels, vec![0, 1, 2]);
        assert_eq!(q.centroids.len(), 3);
    }

    #[test]
    fn solid_input_collapses_to_one_cluster() {
        let mut rng = SeededRng::new(42);
        let q = kmeans(&solid([255, 0, 0], 100), 3, &mut rng, 20).expect("quantize");
        assert_eq!(q.centroids.len(), 3);
        // Identical pixels tie every distance; the lowest index wins.
        assert!(q.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn two_tone_input_separates_cleanly() {
        let mut rng = SeededRng::new(42);
        let mut pixels = solid([255, 0, 0], 200);
        pixels.extend(solid([0, 0, 255], 200));
        let q = kmeans(&pixels, 2, &mut rng, 20).expect("quantize");

        assert_eq!(q.labels[..200].iter().collect::<HashSet<_>>().len(), 1);
        assert_eq!(q.labels[200..].iter().collect::<HashSet<_>>().len(), 1);
        assert_ne!(q.labels[0], q.labels[200]);
    }

    #[test]
    fn identical_seed_reproduces_bitwise() {
        let pixels: Vec<LabColor> = (0..400u32)
            .map(|i| srgb_to_lab([(i * 7 % 256) as u8, (i * 13 % 256) as u8, (i % 256) as u8]))
            .collect();

        let mut rng_a = SeededRng::new(1234);
        let mut rng_b = SeededRng::new(1234);
        let a = kmeans(&pixels, 6, &mut rng_a, 20).expect("run a");
        let b = kmeans(&pixels, 6, &mut rng_b, 20).expect("run b");

        assert_eq!(a.labels, b.labels);
        for (ca, cb) in a.centroids.iter().zip(b.centroids.iter()) {
            assert_eq!(ca.l.to_bits(), cb.l.to_bits());
            assert_eq!(ca.a.to_bits(), cb.a.to_bits());
            assert_eq!(ca.b.to_bits(), cb.b.to_bits());
        }
    }

    #[test]
    fn labels_stay_in_range() {
        let pixels: Vec<LabColor> = (0..257u32)
            .map(|i| srgb_to_lab([(i % 256) as u8, 128, (255 - i % 256) as u8]))
            .collect();
        let mut rng = SeededRng::new(99);
        let q = kmeans(&pixels, 8, &mut rng, 20).expect("quantize");
        assert_eq!(q.labels.len(), 257);
        assert!(q.labels.iter().all(|&l| (l as usize) < 8));
    }
}
