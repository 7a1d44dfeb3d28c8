use nalgebra::DVector;

use crate::{vector::VectorExt, DaeSolverError, IndexType};

/// A root located by [RootFinder::check_root].
#[derive(Clone, Debug, PartialEq)]
pub struct Root {
    pub t: f64,
    /// Indicators that changed sign, or reached zero, at `t`.
    pub indices: Vec<IndexType>,
    /// False if the iteration budget was exhausted before the bracket met the tolerance, `t` is
    /// then the end of the remaining bracket on which the crossing has already happened.
    pub localized: bool,
}

#[derive(Clone)]
pub struct RootFinder {
    t0: f64,
    g0: DVector<f64>,
    g1: DVector<f64>,
    gmid: DVector<f64>,
    max_iter: IndexType,
}

impl RootFinder {
    pub fn new(nroots: usize, max_iter: IndexType) -> Self {
        Self {
            t0: 0.0,
            g0: DVector::zeros(nroots),
            g1: DVector::zeros(nroots),
            gmid: DVector::zeros(nroots),
            max_iter,
        }
    }

    /// Set the lower boundary of the root search.
    /// This function should be called first after [Self::new]
    pub fn init(
        &mut self,
        root_fn: impl Fn(f64, &mut DVector<f64>) -> Result<(), DaeSolverError>,
        t: f64,
    ) -> Result<(), DaeSolverError> {
        root_fn(t, &mut self.g0)?;
        self.t0 = t;
        Ok(())
    }

    /// Set the upper boundary of the root search and checks for a zero crossing.
    /// `root_fn(t, g)` evaluates the indicators at any time in `[t0, t]`, usually by
    /// interpolating the solution over the last step.
    ///
    /// This function assumes that g0 and t0 have already beeen set via [Self::init]
    /// or previous iterations of [Self::check_root]. If no root is found the upper boundary
    /// becomes the lower boundary of the next search.
    ///
    /// We find the root of a function using the method proposed by Sundials [docs](https://sundials.readthedocs.io/en/latest/cvode/Mathematics_link.html#rootfinding)
    pub fn check_root(
        &mut self,
        root_fn: impl Fn(f64, &mut DVector<f64>) -> Result<(), DaeSolverError>,
        t: f64,
    ) -> Result<Option<Root>, DaeSolverError> {
        root_fn(t, &mut self.g1)?;

        let (rootfnd, _gfracmax, imax) = self.g0.root_finding(&self.g1);

        // if no sign change we don't need to find the root
        if imax < 0 {
            let ret = if rootfnd {
                // found a root at the upper boundary and no other sign change, return the root
                Some(Root {
                    t,
                    indices: zero_indices(&self.g1),
                    localized: true,
                })
            } else {
                None
            };
            // setup g0 for next iteration
            std::mem::swap(&mut self.g0, &mut self.g1);
            self.t0 = t;
            return Ok(ret);
        }

        // otherwise we need to do the modified secant method to find the root
        let g_start = self.g0.clone();
        let mut imax = imax as usize;
        let mut alpha = 1.0;
        let mut sign_change = [false, true];
        let mut i = 0;
        let mut t1 = t;
        let mut t0 = self.t0;
        let tol = 100.0 * f64::EPSILON * (t1.abs() + (t1 - t0).abs());
        let mut localized = true;
        while (t1 - t0).abs() > tol {
            if i >= self.max_iter {
                localized = false;
                break;
            }
            let mut t_mid = t1
                - (t1 - t0) * self.g1[imax] / (self.g1[imax] - alpha * self.g0[imax]);

            // adjust t_mid away from the boundaries
            if (t_mid - t0).abs() < 0.5 * tol {
                let fracint = (t1 - t0).abs() / tol;
                let fracsub = if fracint > 5.0 { 0.1 } else { 0.5 / fracint };
                t_mid = t0 + fracsub * (t1 - t0);
            }
            if (t1 - t_mid).abs() < 0.5 * tol {
                let fracint = (t1 - t0).abs() / tol;
                let fracsub = if fracint > 5.0 { 0.1 } else { 0.5 / fracint };
                t_mid = t1 - fracsub * (t1 - t0);
            }

            root_fn(t_mid, &mut self.gmid)?;

            let (rootfnd, _gfracmax, imax_i32) = self.g0.root_finding(&self.gmid);
            let lower = imax_i32 >= 0;

            if lower {
                // Sign change found in (tlo,tmid); replace thi with tmid.
                t1 = t_mid;
                imax = imax_i32 as usize;
                std::mem::swap(&mut self.g1, &mut self.gmid);
            } else if rootfnd {
                // No sign change in (tlo,tmid), but g = 0 at tmid; return root tmid.
                return Ok(Some(Root {
                    t: t_mid,
                    indices: zero_indices(&self.gmid),
                    localized: true,
                }));
            } else {
                // No sign change in (tlo,tmid), and no zero at tmid. Sign change must be in (tmid,thi).  Replace tlo with tmid.
                t0 = t_mid;
                std::mem::swap(&mut self.g0, &mut self.gmid);
            }

            sign_change[i % 2] = lower;
            if i >= 2 {
                alpha = if sign_change[0] != sign_change[1] {
                    1.0
                } else if sign_change[0] {
                    0.5 * alpha
                } else {
                    2.0 * alpha
                };
            }
            i += 1;
        }
        let indices = (0..g_start.len())
            .filter(|&k| g_start[k] * self.g1[k] < 0.0 || self.g1[k] == 0.0)
            .collect();
        Ok(Some(Root {
            t: t1,
            indices,
            localized,
        }))
    }
}

fn zero_indices(g: &DVector<f64>) -> Vec<IndexType> {
    (0..g.len()).filter(|&k| g[k] == 0.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_fn(t: f64, g: &mut DVector<f64>) -> Result<(), DaeSolverError> {
        g[0] = t - 0.4;
        g[1] = 1.0;
        Ok(())
    }

    #[test]
    fn test_root() {
        // check no root
        let mut root_finder = RootFinder::new(2, 50);
        root_finder.init(root_fn, 0.0).unwrap();
        let root = root_finder.check_root(root_fn, 0.3).unwrap();
        assert_eq!(root, None);

        // check root
        let root = root_finder.check_root(root_fn, 1.3).unwrap().unwrap();
        assert!((root.t - 0.4).abs() < 1e-10);
        assert_eq!(root.indices, vec![0]);
        assert!(root.localized);
    }

    #[test]
    fn test_root_at_upper_boundary() {
        let mut root_finder = RootFinder::new(2, 50);
        root_finder.init(root_fn, 0.0).unwrap();
        let root = root_finder.check_root(root_fn, 0.4).unwrap().unwrap();
        assert_eq!(root.t, 0.4);
        assert_eq!(root.indices, vec![0]);
    }

    #[test]
    fn test_root_iteration_cap() {
        // a very flat then very steep indicator needs many secant iterations
        let steep = |t: f64, g: &mut DVector<f64>| -> Result<(), DaeSolverError> {
            g[0] = (t - 0.9).powi(11) + 1e-30 * (t - 0.9);
            Ok(())
        };
        let mut root_finder = RootFinder::new(1, 1);
        root_finder.init(steep, 0.0).unwrap();
        let root = root_finder.check_root(steep, 1.0).unwrap().unwrap();
        assert!(!root.localized);
        assert!(root.t > 0.9 && root.t <= 1.0);
    }
}
