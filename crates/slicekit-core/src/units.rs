//! Fixed-point coordinate units.
//!
//! All planar geometry is stored as integer micrometers so that polygon
//! tests are exact and independent of accumulation order. Settings and
//! speeds stay in millimeters; `scale`/`unscale` convert at the edges.

/// Planar coordinate in micrometers.
pub type Coord = i64;

/// Micrometers per millimeter.
pub const MICRONS_PER_MM: f64 = 1000.0;

/// Convert millimeters to fixed-point micrometers.
#[inline]
pub fn scale(mm: f64) -> Coord {
    (mm * MICRONS_PER_MM).round() as Coord
}

/// Convert fixed-point micrometers back to millimeters.
#[inline]
pub fn unscale(value: Coord) -> f64 {
    value as f64 / MICRONS_PER_MM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_rounds_to_nearest_micron() {
        assert_eq!(scale(1.0), 1000);
        assert_eq!(scale(0.0004), 0);
        assert_eq!(scale(0.0006), 1);
        assert_eq!(scale(-2.5), -2500);
    }

    #[test]
    fn unscale_inverts_scale() {
        for mm in [0.0, 0.2, 1.5, 10.0, 123.456] {
            let c = scale(mm);
            assert!((unscale(c) - mm).abs() < 0.001);
        }
    }
}
