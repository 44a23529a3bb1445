//! Quaternion Characteristic Polynomial (QCP) superposition.
//!
//! Finds the rotation minimizing `sum w_i |R x_i - y_i|^2` between a moved
//! point set `x` and a target set `y` in closed form: the optimal rotation is
//! the eigenvector belonging to the largest eigenvalue of Horn's 4x4 key
//! matrix. The eigenvalue is found by Newton iteration on the matrix's
//! characteristic quartic, starting from an upper bound; the eigenvector is
//! read off a row of the adjugate of `N - lambda I`.

use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::math::{shortest_arc, ZERO_EPSILON};

/// Configuration for the QCP solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QcpConfig {
    /// Relative convergence threshold for the Newton eigenvalue search.
    pub eval_precision: f64,
    /// Squared-norm floor for accepting an adjugate row as the eigenvector.
    pub evec_precision: f64,
    /// Newton iteration cap. The last estimate is used if it is reached.
    pub max_iterations: u32,
}

impl Default for QcpConfig {
    fn default() -> Self {
        Self {
            eval_precision: 1.0e-6,
            evec_precision: 1.0e-11,
            max_iterations: 5,
        }
    }
}

/// Weighted point-set superposition.
///
/// Scratch buffers are owned by the solver and reused; every call to
/// [`Qcp::set`] resets the previous result.
#[derive(Debug, Clone, Default)]
pub struct Qcp {
    config: QcpConfig,
    moved: Vec<Vector3<f64>>,
    target: Vec<Vector3<f64>>,
    weights: Vec<f64>,
    translate: bool,
    rotation: UnitQuaternion<f64>,
    translation: Vector3<f64>,
    rmsd: f64,
    iterations: u32,
}

impl Qcp {
    pub fn new(config: QcpConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub const fn config(&self) -> &QcpConfig {
        &self.config
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.config.max_iterations = max_iterations.max(1);
    }

    /// Load a new problem and solve it.
    ///
    /// `weights` defaults to 1 for every pair. With `translate`, both sets are
    /// centered on their weighted centroids first and the optimal translation
    /// is reported by [`Qcp::translation`]. Extra entries in the longer of
    /// `moved` / `target` are ignored.
    pub fn set(
        &mut self,
        moved: &[Vector3<f64>],
        target: &[Vector3<f64>],
        weights: Option<&[f64]>,
        translate: bool,
    ) {
        debug_assert_eq!(moved.len(), target.len(), "point sets must have equal length");
        let n = moved.len().min(target.len());

        self.moved.clear();
        self.moved.extend_from_slice(&moved[..n]);
        self.target.clear();
        self.target.extend_from_slice(&target[..n]);
        self.weights.clear();
        self.weights
            .extend((0..n).map(|i| weights.and_then(|w| w.get(i)).copied().unwrap_or(1.0)));
        self.translate = translate;
        self.rotation = UnitQuaternion::identity();
        self.translation = Vector3::zeros();
        self.rmsd = 0.0;
        self.iterations = 0;

        self.solve();
    }

    /// Convenience: [`Qcp::set`] then return the optimal rotation.
    pub fn weighted_superpose(
        &mut self,
        moved: &[Vector3<f64>],
        target: &[Vector3<f64>],
        weights: Option<&[f64]>,
        translate: bool,
    ) -> UnitQuaternion<f64> {
        self.set(moved, target, weights, translate);
        self.rotation
    }

    /// Rotation taking the moved set onto the target set.
    pub const fn rotation(&self) -> UnitQuaternion<f64> {
        self.rotation
    }

    /// Translation applied after the rotation (zero unless translating).
    pub const fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Weighted root-mean-square deviation after optimal superposition.
    pub const fn rmsd(&self) -> f64 {
        self.rmsd
    }

    /// Newton steps taken by the last solve.
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    fn solve(&mut self) {
        let n = self.moved.len();
        if n == 0 {
            return;
        }
        let w_sum: f64 = self.weights.iter().sum();
        if w_sum <= 0.0 {
            return;
        }

        let (moved_center, target_center) = if self.translate {
            (
                weighted_centroid(&self.moved, &self.weights, w_sum),
                weighted_centroid(&self.target, &self.weights, w_sum),
            )
        } else {
            (Vector3::zeros(), Vector3::zeros())
        };
        for p in &mut self.moved {
            *p -= moved_center;
        }
        for p in &mut self.target {
            *p -= target_center;
        }

        if n == 1 {
            let rotation = if self.translate {
                UnitQuaternion::identity()
            } else {
                shortest_arc(&self.moved[0], &self.target[0])
            };
            self.rotation = rotation;
            self.rmsd = (rotation * self.moved[0] - self.target[0]).norm();
            self.translation = target_center - rotation * moved_center;
            return;
        }

        // Points are rescaled to unit RMS radius; both precisions are relative to that scale.
        let g_raw: f64 = self
            .moved
            .iter()
            .chain(&self.target)
            .zip(self.weights.iter().chain(&self.weights))
            .map(|(p, w)| w * p.norm_squared())
            .sum();
        let scale = (g_raw / (2.0 * w_sum)).sqrt();
        if scale < ZERO_EPSILON {
            self.translation = target_center - moved_center;
            return;
        }
        let inv_scale = 1.0 / scale;

        let mut g = 0.0;
        let mut s = Matrix3::<f64>::zeros();
        for ((x, y), w) in self.moved.iter().zip(&self.target).zip(&self.weights) {
            let x = x * inv_scale;
            let y = y * inv_scale;
            g += w * (x.norm_squared() + y.norm_squared());
            s += (x * *w) * y.transpose();
        }
        let e0 = g * 0.5;

        let key = key_matrix(&s);
        let (lambda, iterations) = self.max_eigenvalue(&s, &key, e0);
        self.iterations = iterations;

        let rotation = if let Some(rotation) = self.eigen_rotation(&key, lambda) {
            self.rmsd = (2.0 * (e0 - lambda) / w_sum).max(0.0).sqrt() * scale;
            rotation
        } else {
            // Degenerate eigenspace: report the residual of the identity actually returned.
            self.rmsd = weighted_msd(&self.moved, &self.target, &self.weights).sqrt();
            UnitQuaternion::identity()
        };
        self.rotation = rotation;
        self.translation = target_center - rotation * moved_center;
    }

    /// Newton iteration on `P(l) = l^4 + c2 l^2 + c1 l + c0`, from `e0` downward.
    fn max_eigenvalue(&self, s: &Matrix3<f64>, key: &Matrix4<f64>, e0: f64) -> (f64, u32) {
        let c2 = -2.0 * s.norm_squared();
        let c1 = -8.0 * s.determinant();
        let c0 = key.determinant();

        let mut lambda = e0;
        let mut iterations = 0;
        for _ in 0..self.config.max_iterations {
            iterations += 1;
            let previous = lambda;
            let l2 = lambda * lambda;
            let b = (l2 + c2) * lambda;
            let a = b + c1;
            let derivative = 2.0 * l2 * lambda + b + a;
            if derivative.abs() < f64::MIN_POSITIVE {
                break;
            }
            let delta = (a * lambda + c0) / derivative;
            lambda -= delta;
            if !lambda.is_finite() {
                lambda = previous;
                break;
            }
            if (lambda - previous).abs() < (self.config.eval_precision * lambda).abs() {
                break;
            }
        }
        (lambda, iterations)
    }

    /// Eigenvector of `key` for `lambda` from the first usable adjugate row,
    /// or `None` when every row is below the precision floor.
    fn eigen_rotation(&self, key: &Matrix4<f64>, lambda: f64) -> Option<UnitQuaternion<f64>> {
        let shifted = key - Matrix4::identity() * lambda;
        for row in 0..4 {
            let q = adjugate_row(&shifted, row);
            if q.norm_squared() >= self.config.evec_precision {
                let q = Quaternion::new(q[0], q[1], q[2], q[3]);
                return Some(UnitQuaternion::from_quaternion(q));
            }
        }
        None
    }
}

/// Horn's symmetric key matrix for the inner product `s[(a, b)] = sum w x_a y_b`.
///
/// Its dominant eigenvector `(w, x, y, z)` is the rotation taking `x` onto `y`.
fn key_matrix(s: &Matrix3<f64>) -> Matrix4<f64> {
    let (sxx, sxy, sxz) = (s[(0, 0)], s[(0, 1)], s[(0, 2)]);
    let (syx, syy, syz) = (s[(1, 0)], s[(1, 1)], s[(1, 2)]);
    let (szx, szy, szz) = (s[(2, 0)], s[(2, 1)], s[(2, 2)]);
    Matrix4::new(
        sxx + syy + szz, syz - szy, szx - sxz, sxy - syx,
        syz - szy, sxx - syy - szz, sxy + syx, szx + sxz,
        szx - sxz, sxy + syx, -sxx + syy - szz, syz + szy,
        sxy - syx, szx + sxz, syz + szy, -sxx - syy + szz,
    )
}

/// Row `row` of the cofactor matrix of `m` (equal to a column of its adjugate).
fn adjugate_row(m: &Matrix4<f64>, row: usize) -> Vector4<f64> {
    let without_row = m.remove_row(row);
    Vector4::from_fn(|col, _| {
        let minor: Matrix3<f64> = without_row.remove_column(col);
        let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
        sign * minor.determinant()
    })
}

fn weighted_centroid(points: &[Vector3<f64>], weights: &[f64], w_sum: f64) -> Vector3<f64> {
    points
        .iter()
        .zip(weights)
        .fold(Vector3::zeros(), |acc, (p, w)| acc + p * *w)
        / w_sum
}

/// Weighted mean squared distance between corresponding points, without alignment.
pub fn weighted_msd(a: &[Vector3<f64>], b: &[Vector3<f64>], weights: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut w_sum = 0.0;
    for ((x, y), w) in a.iter().zip(b).zip(weights) {
        sum += w * (x - y).norm_squared();
        w_sum += w;
    }
    if w_sum > 0.0 {
        sum / w_sum
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
