/// Column-major 4×4 matrix, laid out the way GL `uniformMatrix4fv` expects it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0[col * 4 + row]
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, v: f32) {
        self.0[col * 4 + row] = v;
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// `self × rhs`: `rhs` is applied first.
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = Mat4([0.0; 16]);
        for row in 0..4 {
            for col in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.get(row, k) * rhs.get(k, col);
                }
                out.set(row, col, sum);
            }
        }
        out
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        let mut m = Self::IDENTITY;
        m.set(0, 3, x);
        m.set(1, 3, y);
        m.set(2, 3, z);
        m
    }

    pub fn scaling(x: f32, y: f32, z: f32) -> Mat4 {
        let mut m = Self::IDENTITY;
        m.set(0, 0, x);
        m.set(1, 1, y);
        m.set(2, 2, z);
        m
    }

    /// Rotation about the Z axis, counter-clockwise, in radians.
    pub fn rotation_z(radians: f32) -> Mat4 {
        let (s, c) = radians.sin_cos();
        let mut m = Self::IDENTITY;
        m.set(0, 0, c);
        m.set(0, 1, -s);
        m.set(1, 0, s);
        m.set(1, 1, c);
        m
    }

    pub fn transform_point(&self, p: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (row, o) in out.iter_mut().enumerate() {
            *o = (0..4).map(|k| self.get(row, k) * p[k]).sum();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_then_scale_order() {
        let t = Mat4::translation(10.0, 0.0, 0.0);
        let s = Mat4::scaling(2.0, 2.0, 1.0);
        // scale first, then translate
        let m = t.mul(&s);
        assert_eq!(m.transform_point([1.0, 1.0, 0.0, 1.0]), [12.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn quarter_turn() {
        let m = Mat4::rotation_z(std::f32::consts::FRAC_PI_2);
        let p = m.transform_point([1.0, 0.0, 0.0, 1.0]);
        assert!(p[0].abs() < 1e-6 && (p[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn identity_is_neutral() {
        let m = Mat4::translation(1.0, 2.0, 3.0);
        assert_eq!(Mat4::IDENTITY.mul(&m), m);
        assert!(Mat4::default().is_identity());
    }
}
