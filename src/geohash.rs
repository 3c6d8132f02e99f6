//! Geohash encoding and "changed since last consumed" tracking: a
//! bit-interleaved binary-search encoder plus a small new/consume state
//! machine for deciding when a location update is worth reporting.

/// Longitude occupies odd bit positions, latitude even, alternating starting
/// with longitude; each base-32 character encodes 5 bits.
const BASE32_BITS: u32 = 5;

/// Maximum supported precision: `9 * 5 = 45` bits, comfortably under 64.
pub const MAX_PRECISION: u8 = 9;

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

const BASE32_MAP: [u8; 32] = *b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Unit a GPS lat/lon signal is expressed in before conversion to decimal
/// degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsUnitType {
    /// Already decimal degrees; no conversion applied.
    DecimalDegree,
    /// Micro-arcseconds (`value / 3_600_000_000.0`).
    MicroArcSecond,
    /// Milli-arcseconds (`value / 3_600_000.0`).
    MilliArcSecond,
    /// Arcseconds (`value / 3_600.0`).
    ArcSecond,
}

/// Converts `value` in `unit` to decimal degrees.
pub fn to_decimal_degrees(value: f64, unit: GpsUnitType) -> f64 {
    match unit {
        GpsUnitType::DecimalDegree => value,
        GpsUnitType::MicroArcSecond => value / 3_600_000_000.0,
        GpsUnitType::MilliArcSecond => value / 3_600_000.0,
        GpsUnitType::ArcSecond => value / 3_600.0,
    }
}

/// Encodes `(lat, lon)` (decimal degrees) as a geohash string of length
/// `precision`. Returns `None` if `precision` exceeds [`MAX_PRECISION`] or
/// either coordinate is out of range.
pub fn encode(lat: f64, lon: f64, precision: u8) -> Option<String> {
    if precision == 0
        || precision > MAX_PRECISION
        || !(LAT_MIN..=LAT_MAX).contains(&lat)
        || !(LON_MIN..=LON_MAX).contains(&lon)
    {
        return None;
    }

    let mut lat_low = LAT_MIN;
    let mut lat_high = LAT_MAX;
    let mut lon_low = LON_MIN;
    let mut lon_high = LON_MAX;
    let mut hash_bits: u64 = 0;
    let mut is_lon_bit = true;
    let num_bits = precision as u32 * BASE32_BITS;

    for _ in 0..num_bits {
        if is_lon_bit {
            let lon_mid = lon_low + (lon_high - lon_low) / 2.0;
            if lon >= lon_mid {
                hash_bits = (hash_bits << 1) | 1;
                lon_low = lon_mid;
            } else {
                hash_bits <<= 1;
                lon_high = lon_mid;
            }
        } else {
            let lat_mid = lat_low + (lat_high - lat_low) / 2.0;
            if lat >= lat_mid {
                hash_bits = (hash_bits << 1) | 1;
                lat_low = lat_mid;
            } else {
                hash_bits <<= 1;
                lat_high = lat_mid;
            }
        }
        is_lon_bit = !is_lon_bit;
    }

    let mut out = String::with_capacity(precision as usize);
    for i in 0..precision {
        let shift = (precision - 1 - i) as u32 * BASE32_BITS;
        let chunk = (hash_bits >> shift) & 0x1F;
        out.push(BASE32_MAP[chunk as usize] as char);
    }
    Some(out)
}

/// Tracks the "new geohash not yet consumed" state for one condition's
/// geohash request, mirroring `GeohashFunctionNode`'s evaluate/consume split:
/// `evaluate` runs every tick and flags whether the hash changed at the
/// requested precision; `consume` hands the current/previous strings to a
/// snapshot and clears the flag.
#[derive(Debug, Clone, Default)]
pub struct GeohashTracker {
    current: String,
    prev_reported: String,
    is_new: bool,
}

impl GeohashTracker {
    /// An empty tracker: no geohash computed yet.
    pub fn new() -> Self {
        GeohashTracker::default()
    }

    /// Computes the geohash for `(lat, lon)` at [`MAX_PRECISION`] and
    /// compares it against the previous computation truncated to
    /// `precision` characters. Returns whether the hash changed at that
    /// precision (and sets the internal "new" flag the same way). The first
    /// successful computation always counts as changed.
    pub fn evaluate(&mut self, lat: f64, lon: f64, precision: u8) -> bool {
        self.is_new = false;
        let precision = precision.min(MAX_PRECISION);
        let Some(current) = encode(lat, lon, MAX_PRECISION) else {
            return false;
        };

        let precision = precision as usize;
        if self.current.len() >= precision && current.len() >= precision {
            if current[..precision] != self.current[..precision] {
                self.is_new = true;
            }
        } else if self.current.is_empty() {
            self.is_new = true;
        }
        self.current = current;
        self.is_new
    }

    /// Whether [`GeohashTracker::evaluate`] flagged a change not yet
    /// consumed.
    pub fn has_new_geohash(&self) -> bool {
        self.is_new
    }

    /// Hands back `(current, previous)` geohash strings and clears the "new"
    /// flag, rolling `current` into `previous` for the next evaluation.
    pub fn consume(&mut self) -> (String, String) {
        self.is_new = false;
        let current = self.current.clone();
        let previous = self.prev_reported.clone();
        self.prev_reported = self.current.clone();
        (current, previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_coordinate() {
        // San Francisco Ferry Building area.
        let hash = encode(37.7749, -122.4194, 9).unwrap();
        assert_eq!(hash.len(), 9);
        assert!(hash.starts_with("9q8yy"));
    }

    #[test]
    fn encode_out_of_range_returns_none() {
        assert!(encode(91.0, 0.0, 5).is_none());
        assert!(encode(0.0, 181.0, 5).is_none());
        assert!(encode(0.0, 0.0, 10).is_none());
    }

    #[test]
    fn tracker_flags_first_evaluation_as_new() {
        let mut tracker = GeohashTracker::new();
        assert!(tracker.evaluate(37.7749, -122.4194, 5));
    }

    #[test]
    fn tracker_detects_change_at_precision_but_not_coarser() {
        // ~55m move: far larger than a 9-char cell (~4.8m) so the fine hash
        // must differ, far smaller than a 5-char cell (~4.9km) so the
        // coarse prefix must not.
        let (lat_a, lon_a) = (37.7749, -122.4194);
        let (lat_b, lon_b) = (37.7754, -122.4199);

        let mut fine = GeohashTracker::new();
        fine.evaluate(lat_a, lon_a, 9);
        let (first_hash, _) = fine.consume();
        let changed_fine = fine.evaluate(lat_b, lon_b, 9);
        let (second_hash, _) = fine.consume();
        assert_ne!(
            first_hash, second_hash,
            "the two coordinates must encode differently at full precision"
        );
        assert!(changed_fine, "evaluate must flag the change at precision 9");
        assert_eq!(
            &first_hash[..5],
            &second_hash[..5],
            "test fixture must stay within the same 5-char cell"
        );

        let mut coarse = GeohashTracker::new();
        coarse.evaluate(lat_a, lon_a, 5);
        coarse.consume();
        let changed_coarse = coarse.evaluate(lat_b, lon_b, 5);
        assert!(
            !changed_coarse,
            "the same move must not register as changed at precision 5"
        );
    }

    #[test]
    fn gps_unit_conversion_round_trip() {
        let micro = 37.7749 * 3_600_000_000.0;
        assert!((to_decimal_degrees(micro, GpsUnitType::MicroArcSecond) - 37.7749).abs() < 1e-6);
    }
}
