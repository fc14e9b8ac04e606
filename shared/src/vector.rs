///Represents a vector in 2D space.
///
/// Positions and velocities share this type; the difference between the
/// extended-range position and the byte-range velocity only exists on the
/// wire (see [`crate::snapshot`]).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };
    pub const UP: Vector2 = Vector2 { x: 0.0, y: -1.0 };
    pub const DOWN: Vector2 = Vector2 { x: 0.0, y: 1.0 };
    pub const LEFT: Vector2 = Vector2 { x: -1.0, y: 0.0 };
    pub const RIGHT: Vector2 = Vector2 { x: 1.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize_diagonal() {
        let v = Vector2::UP.add(&Vector2::RIGHT).normalize();
        assert_approx_eq!(v.magnitude(), 1.0, 1e-6);
        assert_approx_eq!(v.x, std::f32::consts::FRAC_1_SQRT_2, 1e-6);
        assert_approx_eq!(v.y, -std::f32::consts::FRAC_1_SQRT_2, 1e-6);
    }

    #[test]
    fn test_normalize_zero_stays_zero() {
        assert_eq!(Vector2::ZERO.normalize(), Vector2::ZERO);
        assert_eq!(Vector2::LEFT.add(&Vector2::RIGHT).normalize(), Vector2::ZERO);
    }

    #[test]
    fn test_scale() {
        let v = Vector2::new(3.0, -4.0);
        assert_eq!(v.magnitude(), 5.0);
        assert_eq!(v.scale(2.0), Vector2::new(6.0, -8.0));
    }
}
