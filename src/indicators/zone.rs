// =============================================================================
// Zone Classifier
// =============================================================================
//
// Maps a price's position relative to a band into a signed bucket:
//
//    0         price within 1e-4 of the middle band (or middle is 0)
//    1..=10    above the middle, scaled by (price - middle) / (upper - middle)
//  -10..=-1    below the middle, scaled by (middle - price) / (middle - lower)
//
// A collapsed half-band (upper <= middle, or lower >= middle) saturates at ±10.

use super::Bands;

const MIDDLE_EPSILON: f64 = 1e-4;

pub fn classify_zone(price: f64, middle: f64, upper: f64, lower: f64) -> i32 {
    if middle == 0.0 || (price - middle).abs() < MIDDLE_EPSILON {
        return 0;
    }

    if price > middle {
        let half_width = upper - middle;
        if half_width <= 0.0 {
            return 10;
        }
        bucket((price - middle) / half_width)
    } else {
        let half_width = middle - lower;
        if half_width <= 0.0 {
            return -10;
        }
        -bucket((middle - price) / half_width)
    }
}

/// Zone of `price` against the newest sample of `bands`.
pub fn latest_zone(price: f64, bands: &Bands) -> i32 {
    match (bands.middle.first(), bands.upper.first(), bands.lower.first()) {
        (Some(&middle), Some(&upper), Some(&lower)) => classify_zone(price, middle, upper, lower),
        _ => 0,
    }
}

fn bucket(ratio: f64) -> i32 {
    (ratio * 10.0).round().clamp(1.0, 10.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_middle_is_zero() {
        assert_eq!(classify_zone(100.0, 100.0, 110.0, 90.0), 0);
        assert_eq!(classify_zone(100.00005, 100.0, 110.0, 90.0), 0);
    }

    #[test]
    fn zero_middle_is_zero() {
        assert_eq!(classify_zone(5.0, 0.0, 1.0, -1.0), 0);
    }

    #[test]
    fn above_middle_buckets() {
        assert_eq!(classify_zone(105.0, 100.0, 110.0, 90.0), 5);
        assert_eq!(classify_zone(110.0, 100.0, 110.0, 90.0), 10);
        assert_eq!(classify_zone(111.0, 100.0, 110.0, 90.0), 10);
        // Tiny excursions still register as 1.
        assert_eq!(classify_zone(100.01, 100.0, 110.0, 90.0), 1);
    }

    #[test]
    fn below_middle_buckets() {
        assert_eq!(classify_zone(95.0, 100.0, 110.0, 90.0), -5);
        assert_eq!(classify_zone(80.0, 100.0, 110.0, 90.0), -10);
        assert_eq!(classify_zone(99.99, 100.0, 110.0, 90.0), -1);
    }

    #[test]
    fn collapsed_band_saturates() {
        assert_eq!(classify_zone(101.0, 100.0, 100.0, 100.0), 10);
        assert_eq!(classify_zone(99.0, 100.0, 100.0, 100.0), -10);
    }

    #[test]
    fn latest_zone_uses_index_zero() {
        let bands = Bands {
            upper: vec![110.0, 0.0],
            middle: vec![100.0, 0.0],
            lower: vec![90.0, 0.0],
        };
        assert_eq!(latest_zone(107.0, &bands), 7);
        assert_eq!(latest_zone(107.0, &Bands::default()), 0);
    }
}
