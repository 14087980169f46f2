use glam::Vec4Swizzles;

pub fn align(value: u32, alignment: u32) -> u32 {
    (value + (alignment - 1)) & (!(alignment - 1))
}

/// Rounds `value` up to a multiple of `chunk`, which need not be a power of two.
pub fn round_up(value: usize, chunk: usize) -> usize {
    value.div_ceil(chunk) * chunk
}

pub trait MatrixExt {
    fn translation(&self) -> glam::Vec3;
}

impl MatrixExt for glam::Mat4 {
    #[inline]
    fn translation(&self) -> glam::Vec3 {
        self.w_axis.xyz()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use crate::utils::{align, round_up, MatrixExt};

    #[test]
    fn test_translation() {
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

        assert_eq!(matrix.translation(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(4, 4), 4);
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(7, 3), 9);
    }

    #[test]
    fn test_align() {
        assert_eq!(align(80, 256), 256);
        assert_eq!(align(257, 256), 512);
    }
}
