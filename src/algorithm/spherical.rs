use std::f64::consts;

use crate::algorithm::{Algorithm, Utils, MEAN_EARTH_RADIUS};
use crate::position::Coords;
use crate::utils::Distance;

#[derive(Clone, Copy, Default)]
pub struct Spherical {}

impl Algorithm for Spherical {
    fn distance_to(&self, from: &Coords, to: &Coords) -> Distance {
        let φ1 = from.lat.to_radians();
        let φ2 = to.lat.to_radians();
        let δφ = (to.lat - from.lat).to_radians();
        let δλ = (to.lon - from.lon).to_radians();

        let a = (δφ / 2.0).sin().powi(2) + φ1.cos() * φ2.cos() * (δλ / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        Distance::from_m(MEAN_EARTH_RADIUS.m() * c)
    }

    fn heading_to(&self, from: &Coords, to: &Coords) -> f64 {
        let φ1 = from.lat.to_radians();
        let φ2 = to.lat.to_radians();
        let δλ = (to.lon - from.lon).to_radians();

        let y = δλ.sin() * φ2.cos();
        let x = φ1.cos() * φ2.sin() - φ1.sin() * φ2.cos() * δλ.cos();
        let θ = y.atan2(x);

        θ.to_degrees().wrap360()
    }

    fn distance_and_heading_to(&self, from: &Coords, to: &Coords) -> (Distance, f64) {
        (self.distance_to(from, to), self.heading_to(from, to))
    }

    fn destination(&self, from: &Coords, heading: f64, distance: &Distance) -> Coords {
        let φ1 = from.lat.to_radians();
        let λ1 = from.lon.to_radians();
        let θ = heading.to_radians();
        let δ = distance.m() / MEAN_EARTH_RADIUS.m();

        let φ2 = (φ1.sin() * δ.cos() + φ1.cos() * δ.sin() * θ.cos()).asin();
        let λ2 = λ1 + (θ.sin() * δ.sin() * φ1.cos()).atan2(δ.cos() - φ1.sin() * φ2.sin());

        Coords {
            lat: φ2.to_degrees(),
            lon: λ2.to_degrees(),
        }
    }

    fn midpoint(&self, from: &Coords, to: &Coords) -> Coords {
        let φ1 = from.lat.to_radians();
        let λ1 = from.lon.to_radians();
        let φ2 = to.lat.to_radians();
        let δλ = (to.lon - from.lon).to_radians();

        let bx = φ2.cos() * δλ.cos();
        let by = φ2.cos() * δλ.sin();

        let φ3 = (φ1.sin() + φ2.sin()).atan2(((φ1.cos() + bx).powi(2) + by.powi(2)).sqrt());
        let λ3 = λ1 + by.atan2(φ1.cos() + bx);

        Coords {
            lat: φ3.to_degrees(),
            lon: λ3.to_degrees(),
        }
    }

    fn rhumb_distance_to(&self, from: &Coords, to: &Coords) -> Distance {
        let φ1 = from.lat.to_radians();
        let φ2 = to.lat.to_radians();
        let δφ = φ2 - φ1;

        let mut δλ = (to.lon - from.lon).to_radians();
        if δλ.abs() > consts::PI {
            if δλ > 0.0 {
                δλ = -(consts::TAU - δλ)
            } else {
                δλ = consts::TAU + δλ
            }
        }

        let δψ = ((φ2 / 2.0 + consts::FRAC_PI_4).tan() / (φ1 / 2.0 + consts::FRAC_PI_4).tan()).ln();

        let mut q = δφ / δψ;
        if δψ.abs() <= 10e-12 {
            q = φ1.cos()
        }

        let δ = (δφ * δφ + q * q * δλ * δλ).sqrt();

        Distance::from_m(MEAN_EARTH_RADIUS.m() * δ)
    }

    fn rhumb_heading_to(&self, from: &Coords, to: &Coords) -> f64 {
        let φ1 = from.lat.to_radians();
        let φ2 = to.lat.to_radians();

        let mut δλ = (to.lon - from.lon).to_radians();
        if δλ.abs() > consts::PI {
            if δλ > 0.0 {
                δλ = -(consts::TAU - δλ)
            } else {
                δλ = consts::TAU + δλ
            }
        }

        let δψ = ((φ2 / 2.0 + consts::FRAC_PI_4).tan() / (φ1 / 2.0 + consts::FRAC_PI_4).tan()).ln();

        let θ = δλ.atan2(δψ);

        θ.to_degrees().wrap360()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GDANSK: Coords = Coords { lat: 54.40, lon: 18.67 };
    const HEL: Coords = Coords { lat: 54.60, lon: 18.80 };

    #[test]
    fn distance_matches_chart() {
        // Gdansk bay crossing is roughly 13 NM.
        let d = Spherical {}.distance_to(&GDANSK, &HEL);
        assert!((d.nm() - 12.8).abs() < 0.5, "got {}", d.nm());

        // One arc minute of latitude is one nautical mile (within sphere error).
        let a = Coords::new(0.0, 0.0);
        let b = Coords::new(1.0 / 60.0, 0.0);
        let d = Spherical {}.distance_to(&a, &b);
        assert!((d.nm() - 1.0).abs() < 0.002, "got {}", d.nm());
    }

    #[test]
    fn heading_cardinals() {
        let alg = Spherical {};
        let origin = Coords::new(54.0, 18.0);
        assert!((alg.heading_to(&origin, &Coords::new(55.0, 18.0)) - 0.0).abs() < 1e-6);
        assert!((alg.heading_to(&origin, &Coords::new(53.0, 18.0)) - 180.0).abs() < 1e-6);
        assert!((alg.heading_to(&origin, &Coords::new(54.0, 19.0)) - 90.0).abs() < 1.0);
        assert!((alg.heading_to(&origin, &Coords::new(54.0, 17.0)) - 270.0).abs() < 1.0);
    }

    #[test]
    fn destination_round_trip() {
        let alg = Spherical {};
        let from = Coords::new(54.5, 18.5);
        for heading in [0.0, 37.0, 90.0, 200.0, 359.0] {
            let to = alg.destination(&from, heading, &Distance::from_nm(25.0));
            let (d, h) = alg.distance_and_heading_to(&from, &to);
            assert!((d.nm() - 25.0).abs() < 0.01, "distance {}", d.nm());
            assert!((h - heading).abs() < 0.1, "heading {h} vs {heading}");
        }
    }

    #[test]
    fn midpoint_is_halfway() {
        let alg = Spherical {};
        let mid = alg.midpoint(&GDANSK, &HEL);
        let d1 = alg.distance_to(&GDANSK, &mid);
        let d2 = alg.distance_to(&mid, &HEL);
        assert!((d1.m() - d2.m()).abs() < 1.0);
    }

    #[test]
    fn rhumb_close_to_great_circle_on_short_legs() {
        let alg = Spherical {};
        let gc = alg.distance_to(&GDANSK, &HEL);
        let rh = alg.rhumb_distance_to(&GDANSK, &HEL);
        assert!((gc.m() - rh.m()).abs() / gc.m() < 0.001);
    }
}
