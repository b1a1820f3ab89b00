use super::{Particle, Particles, TopologyEvent};
use crate::math::*;
use crate::mesh::ShapeFunction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitMergeParams {
    pub enabled: bool,
    /// Anisotropy ratio (square root of the eigenvalue ratio) above which a particle splits.
    pub split_ratio: T,
    /// Anisotropy ratio above which a particle may be merged with a neighbour.
    pub merge_ratio: T,
    /// Particles whose spread along their major axis is below this many reference lengths
    /// never split. The reference length is the spread of a cube of the mean particle volume.
    pub min_split_length: T,
    /// Particles lighter than this fraction of the mean volume never split.
    pub min_split_volume: T,
    /// Frame spreads are clamped within this factor of the reference length. Zero disables
    /// the clamp.
    pub frame_clamp: T,
}

impl Default for SplitMergeParams {
    fn default() -> Self {
        SplitMergeParams {
            enabled: true,
            split_ratio: 4.,
            merge_ratio: 2.,
            min_split_length: 1.,
            min_split_volume: 1. / 64.,
            frame_clamp: 8.,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitMergeStats {
    pub splits: usize,
    pub merges: usize,
}

/// Relative floor applied to frame eigenvalues.
const EIGEN_FLOOR: T = 1e-12;

#[derive(Debug, Clone, Copy)]
enum Decision {
    Keep,
    Split { axis: TV, lmax: T },
    Merge { cell: usize, short_axis: TV, half_width: T },
}

fn principal_axes(frame: &Mat) -> (TV, T, TV, T) {
    let eigen = frame.symmetric_eigen();
    let max = eigen.eigenvalues.imax();
    let min = eigen.eigenvalues.imin();
    let lmax = eigen.eigenvalues[max].max(0.);
    let lmin = eigen.eigenvalues[min].max(EIGEN_FLOOR * lmax).max(T::MIN_POSITIVE);
    (
        eigen.eigenvectors.column(max).into_owned(),
        lmax,
        eigen.eigenvectors.column(min).into_owned(),
        lmin,
    )
}

/// `frame` with its eigenvalues clamped to `[lo, hi]`.
fn clamp_frame(frame: &Mat, lo: T, hi: T) -> Mat {
    let eigen = frame.symmetric_eigen();
    let clamped = eigen.eigenvalues.map(|l| l.max(lo).min(hi));
    eigen.eigenvectors * Mat::from_diagonal(&clamped) * eigen.eigenvectors.transpose()
}

/// Half-width along `n` of a uniform box with covariance `frame`.
fn half_width(frame: &Mat, n: &TV) -> T {
    (3. * n.dot(&(frame * n)).max(0.)).sqrt()
}

impl Particles {
    /// Splits particles that are too elongated and merges flat neighbours.
    ///
    /// A particle splits in two along its major axis when its anisotropy ratio exceeds
    /// `split_ratio`, it is longer than `min_split_length`, and it is not too small compared
    /// with the mean particle. Otherwise, if its ratio exceeds `merge_ratio`, it becomes a
    /// merge candidate of the cell containing it. Candidates of a cell are paired first-come
    /// first-served when they overlap along the short axis of the first one.
    ///
    /// Frames are clamped around the reference length first, which repairs degenerate flat
    /// frames.
    pub fn split_and_merge(
        &mut self,
        shape: &dyn ShapeFunction,
        params: &SplitMergeParams,
    ) -> SplitMergeStats {
        let mut stats = SplitMergeStats::default();
        if !params.enabled || self.count() == 0 {
            return stats;
        }

        let mean_volume = self.mean_volume();
        let reference = mean_volume.cbrt() / (12. as T).sqrt();
        let (lo, hi) = if params.frame_clamp > 0. && reference > 0. {
            let spread = |s: T| s * s;
            (
                spread(reference / params.frame_clamp),
                spread(reference * params.frame_clamp),
            )
        } else {
            (0., T::INFINITY)
        };

        let (decisions, frames): (Vec<Decision>, Vec<Mat>) = (0..self.count())
            .into_par_iter()
            .map(|i| {
                let (major, lmax, minor, lmin) = principal_axes(&self.frame[i]);
                let ratio = (lmax / lmin).sqrt();
                let length = lmax.sqrt();

                let decision = if ratio > params.split_ratio
                    && length > params.min_split_length * reference
                    && self.volume[i] > params.min_split_volume * mean_volume
                {
                    Decision::Split {
                        axis: major,
                        lmax: lmax.max(lo).min(hi),
                    }
                } else if ratio > params.merge_ratio {
                    Decision::Merge {
                        cell: shape.locate(&self.position[i]).cell,
                        short_axis: minor,
                        half_width: (3. * lmin).sqrt(),
                    }
                } else {
                    Decision::Keep
                };
                (decision, clamp_frame(&self.frame[i], lo, hi))
            })
            .unzip();
        self.frame[..frames.len()].copy_from_slice(&frames);

        for (i, decision) in decisions.iter().enumerate() {
            if let Decision::Split { axis, lmax } = decision {
                if self.is_full() {
                    break;
                }
                self.split(i, axis, *lmax);
                stats.splits += 1;
            }
        }

        let mut candidates: BTreeMap<usize, Vec<(usize, TV, T)>> = BTreeMap::new();
        for (i, decision) in decisions.iter().enumerate() {
            if let Decision::Merge {
                cell,
                short_axis,
                half_width,
            } = decision
            {
                candidates
                    .entry(*cell)
                    .or_default()
                    .push((i, *short_axis, *half_width));
            }
        }

        let mut absorbed = Vec::new();
        for list in candidates.values() {
            let mut taken = vec![false; list.len()];
            for a in 0..list.len() {
                if taken[a] {
                    continue;
                }
                let (i, n, h) = list[a];
                let partner = (a + 1..list.len()).find(|&b| {
                    let j = list[b].0;
                    !taken[b]
                        && (self.position[j] - self.position[i]).dot(&n).abs()
                            <= h + half_width(&self.frame[j], &n)
                });
                if let Some(b) = partner {
                    taken[a] = true;
                    taken[b] = true;
                    self.merge(i, list[b].0);
                    absorbed.push(list[b].0);
                    stats.merges += 1;
                }
            }
        }
        self.compact(&absorbed);

        if stats.splits > 0 || stats.merges > 0 {
            tracing::debug!(
                "Split {} and merged {} particles, {} remain",
                stats.splits,
                stats.merges,
                self.count()
            );
        }
        stats
    }

    /// Splits `i` in two along `axis`; `lmax` is the frame eigenvalue along that axis.
    fn split(&mut self, i: usize, axis: &TV, lmax: T) {
        let mut p = self.get(i);
        let offset = axis * (0.5 * (3. * lmax).sqrt());

        // The eigenvalue along the axis drops to a quarter.
        p.frame -= 0.75 * lmax * axis * axis.transpose();
        p.volume *= 0.5;

        let mut q = p;
        p.position -= offset;
        q.position += offset;
        self.set(i, p);

        if let Some(j) = self.push(q) {
            self.events.log(TopologyEvent::Split {
                first: i,
                second: j,
                offset,
            });
        }
    }

    /// Merges `j` into `i`, leaving `j` in place for a later removal.
    fn merge(&mut self, i: usize, j: usize) {
        let a = self.get(i);
        let b = self.get(j);
        let merged = combine(&a, &b);
        self.set(i, merged);
        self.events.log(TopologyEvent::Merge {
            survivor: i,
            absorbed: j,
            offset: merged.position - a.position,
        });
    }
}

/// Volume-weighted combination of two particles. The frame gets the parallel-axis term so that
/// it stays the covariance of the union.
fn combine(a: &Particle, b: &Particle) -> Particle {
    let volume = a.volume + b.volume;
    let wa = a.volume / volume;
    let wb = b.volume / volume;

    let position = wa * a.position + wb * b.position;
    let da = a.position - position;
    let db = b.position - position;

    Particle {
        volume,
        position,
        velocity: wa * a.velocity + wb * b.velocity,
        frame: wa * (a.frame + da * da.transpose()) + wb * (b.frame + db * db.transpose()),
        orientation: super::generate::normalize_trace(&(wa * a.orientation + wb * b.orientation)),
        affine: wa * a.affine + wb * b.affine,
        inertia: wa * a.inertia + wb * b.inertia,
        cohesion: wa * a.cohesion + wb * b.cohesion,
    }
}
