//! Linear elastic 3D frame
//!
//! Six degrees of freedom per node `[ux, uy, uz, θx, θy, θz]`, Euler-Bernoulli
//! members with circular solid sections, `BASE` fully fixed. The reduced
//! stiffness matrix is factorized with Cholesky; a failed factorization
//! means the frame is a mechanism.

use std::collections::BTreeMap;

use nalgebra::{Cholesky, DMatrix, DVector, Matrix3, SMatrix, SVector, Vector3};

use crate::calculations::dge::{ConnectionKind, Geometry};
use crate::errors::{CalcError, CalcResult};
use crate::loads::NodalLoads;

pub type Mat12 = SMatrix<f64, 12, 12>;
pub type Vec12 = SVector<f64, 12>;

const DOF: usize = 6;

/// Solid circular section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub area: f64,
    pub iy: f64,
    pub iz: f64,
    /// Torsion constant
    pub j: f64,
}

impl Section {
    pub fn circular(d: f64) -> Self {
        let r2 = (d / 2.0).powi(2);
        let i = std::f64::consts::PI * r2 * r2 / 4.0;
        Section {
            area: std::f64::consts::PI * r2,
            iy: i,
            iz: i,
            j: 2.0 * i,
        }
    }
}

/// Local axes of a member from `a` to `b`: rows `x` (along), `y`, `z`.
///
/// `y` is horizontal for inclined and horizontal members; vertical
/// members take the global `x` as their local `y`.
pub fn local_axes(a: [f64; 3], b: [f64; 3]) -> Option<Matrix3<f64>> {
    let d = Vector3::from(b) - Vector3::from(a);
    let length = d.norm();
    if length < 1e-9 {
        return None;
    }
    let ex = d / length;
    let ey = if ex.z.abs() > 0.999 {
        Vector3::x()
    } else {
        Vector3::z().cross(&ex).normalize()
    };
    let ez = ex.cross(&ey);
    Some(Matrix3::from_rows(&[ex.transpose(), ey.transpose(), ez.transpose()]))
}

/// 12×12 global-to-local transformation.
pub fn transformation(r: &Matrix3<f64>) -> Mat12 {
    let mut t = Mat12::zeros();
    for block in 0..4 {
        t.fixed_view_mut::<3, 3>(3 * block, 3 * block).copy_from(r);
    }
    t
}

/// Local stiffness of a frame member.
pub fn local_stiffness(e: f64, g: f64, s: &Section, l: f64) -> Mat12 {
    let ea = e * s.area / l;
    let gj = g * s.j / l;
    let (z3, z2, z1) = (e * s.iz / l.powi(3), e * s.iz / l.powi(2), e * s.iz / l);
    let (y3, y2, y1) = (e * s.iy / l.powi(3), e * s.iy / l.powi(2), e * s.iy / l);

    let mut k = Mat12::zeros();
    let mut set = |i: usize, j: usize, v: f64| {
        k[(i, j)] = v;
        k[(j, i)] = v;
    };
    // Axial and torsion
    set(0, 0, ea);
    set(6, 6, ea);
    set(0, 6, -ea);
    set(3, 3, gj);
    set(9, 9, gj);
    set(3, 9, -gj);
    // Bending in the local x-y plane
    set(1, 1, 12.0 * z3);
    set(7, 7, 12.0 * z3);
    set(1, 7, -12.0 * z3);
    set(1, 5, 6.0 * z2);
    set(1, 11, 6.0 * z2);
    set(5, 7, -6.0 * z2);
    set(7, 11, -6.0 * z2);
    set(5, 5, 4.0 * z1);
    set(11, 11, 4.0 * z1);
    set(5, 11, 2.0 * z1);
    // Bending in the local x-z plane
    set(2, 2, 12.0 * y3);
    set(8, 8, 12.0 * y3);
    set(2, 8, -12.0 * y3);
    set(2, 4, -6.0 * y2);
    set(2, 10, -6.0 * y2);
    set(4, 8, 6.0 * y2);
    set(8, 10, 6.0 * y2);
    set(4, 4, 4.0 * y1);
    set(10, 10, 4.0 * y1);
    set(4, 10, 2.0 * y1);
    k
}

/// One frame member.
#[derive(Debug, Clone)]
pub struct Member {
    pub a: String,
    pub b: String,
    pub kind: ConnectionKind,
    pub length: f64,
    pub axes: Matrix3<f64>,
    k_local: Mat12,
    t: Mat12,
    ia: usize,
    ib: usize,
}

impl Member {
    fn dofs(&self) -> impl Iterator<Item = usize> + '_ {
        (0..DOF).map(move |i| self.ia * DOF + i).chain((0..DOF).map(move |i| self.ib * DOF + i))
    }

    fn global_stiffness(&self) -> Mat12 {
        self.t.transpose() * self.k_local * self.t
    }

    /// Local end forces `[f_a; f_b]` acting on the member.
    pub fn end_forces(&self, d: &DVector<f64>) -> Vec12 {
        let mut de = Vec12::zeros();
        for (local, global) in self.dofs().enumerate() {
            de[local] = d[global];
        }
        self.k_local * (self.t * de)
    }
}

/// Assembled frame of a geometry.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Node name → node index
    pub index: BTreeMap<String, usize>,
    pub members: Vec<Member>,
    base: usize,
    k: DMatrix<f64>,
}

/// Displacements of every node and reactions at `BASE`.
#[derive(Debug, Clone)]
pub struct FrameSolution {
    pub d: DVector<f64>,
    pub base_reaction: [f64; 6],
}

impl Frame {
    /// Assemble members from every non-chain connection.
    pub fn assemble(geometry: &Geometry, e: f64, g: f64, section_for: impl Fn(ConnectionKind) -> Section) -> CalcResult<Frame> {
        let mut index = BTreeMap::new();
        for c in geometry.members() {
            for name in [&c.a, &c.b] {
                let next = index.len();
                index.entry(name.clone()).or_insert(next);
            }
        }
        let base = *index
            .get("BASE")
            .ok_or_else(|| CalcError::singular_stiffness("BASE is not connected to any member"))?;

        let mut members = Vec::new();
        for c in geometry.members() {
            let na = geometry.node(&c.a)?;
            let nb = geometry.node(&c.b)?;
            let axes = local_axes(na.position(), nb.position())
                .ok_or_else(|| CalcError::singular_stiffness(format!("member {}-{} has zero length", c.a, c.b)))?;
            let length = na.distance_to(nb);
            let section = section_for(c.kind);
            members.push(Member {
                a: c.a.clone(),
                b: c.b.clone(),
                kind: c.kind,
                length,
                axes,
                k_local: local_stiffness(e, g, &section, length),
                t: transformation(&axes),
                ia: index[&c.a],
                ib: index[&c.b],
            });
        }

        let n = index.len() * DOF;
        let mut k = DMatrix::zeros(n, n);
        for m in &members {
            let kg = m.global_stiffness();
            let dofs: Vec<usize> = m.dofs().collect();
            for (i, gi) in dofs.iter().enumerate() {
                for (j, gj) in dofs.iter().enumerate() {
                    k[(*gi, *gj)] += kg[(i, j)];
                }
            }
        }
        Ok(Frame { index, members, base, k })
    }

    fn is_fixed(&self, dof: usize) -> bool {
        dof / DOF == self.base
    }

    /// Global load vector; loads on nodes outside the frame are rejected.
    pub fn load_vector(&self, loads: &NodalLoads) -> CalcResult<DVector<f64>> {
        let mut f = DVector::zeros(self.index.len() * DOF);
        for (name, components) in &loads.nodes {
            let Some(&i) = self.index.get(name) else {
                return Err(CalcError::singular_stiffness(format!(
                    "loaded node {} is not connected to the frame",
                    name
                )));
            };
            for c in components {
                for axis in 0..3 {
                    f[i * DOF + axis] += c.force[axis];
                    f[i * DOF + 3 + axis] += c.moment[axis];
                }
            }
        }
        Ok(f)
    }

    pub fn solve(&self, loads: &NodalLoads) -> CalcResult<FrameSolution> {
        let f = self.load_vector(loads)?;
        let n = f.len();
        let free: Vec<usize> = (0..n).filter(|d| !self.is_fixed(*d)).collect();

        let mut k_ff = DMatrix::zeros(free.len(), free.len());
        let mut f_f = DVector::zeros(free.len());
        for (i, gi) in free.iter().enumerate() {
            f_f[i] = f[*gi];
            for (j, gj) in free.iter().enumerate() {
                k_ff[(i, j)] = self.k[(*gi, *gj)];
            }
        }
        let chol = Cholesky::new(k_ff)
            .ok_or_else(|| CalcError::singular_stiffness("stiffness matrix is not positive definite"))?;
        let d_f = chol.solve(&f_f);

        let mut d = DVector::zeros(n);
        for (i, gi) in free.iter().enumerate() {
            d[*gi] = d_f[i];
        }
        let kd = &self.k * &d;
        let mut base_reaction = [0.0; 6];
        for (axis, r) in base_reaction.iter_mut().enumerate() {
            let dof = self.base * DOF + axis;
            *r = kd[dof] - f[dof];
        }
        Ok(FrameSolution { d, base_reaction })
    }

    /// Displacement vector of `node`
    pub fn displacement(&self, solution: &FrameSolution, node: &str) -> Option<[f64; 6]> {
        let i = *self.index.get(node)?;
        let mut out = [0.0; 6];
        for (k, v) in out.iter_mut().enumerate() {
            *v = solution.d[i * DOF + k];
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_local_stiffness_symmetric() {
        let k = local_stiffness(3.0e9, 1.25e9, &Section::circular(0.3), 4.0);
        assert_relative_eq!((k - k.transpose()).norm(), 0.0, epsilon = 1e-6);
        // Rigid translation produces no forces
        let mut u = Vec12::zeros();
        u[0] = 1.0;
        u[6] = 1.0;
        assert_relative_eq!((k * u).norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_axes_orthonormal() {
        for b in [[0.0, 0.0, 5.0], [3.0, 0.0, 0.0], [1.0, 2.0, 3.0], [0.0, 0.0, -2.0]] {
            let r = local_axes([0.0, 0.0, 0.0], b).unwrap();
            assert_relative_eq!((r * r.transpose() - Matrix3::identity()).norm(), 0.0, epsilon = 1e-12);
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        }
        assert!(local_axes([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]).is_none());
    }
}
