use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::ops;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::Duration;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub const METERS_PER_NM: f64 = 1852.0;

#[derive(Clone, Copy, Debug, Default)]
pub struct Speed {
    pub(crate) value: f64,
    pub(crate) unit: SpeedUnit,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) enum SpeedUnit {
    #[default]
    Knot,
    MeterPerSecond,
}

impl Speed {
    pub fn from_kts(value: f64) -> Self {
        Self {
            value,
            unit: SpeedUnit::Knot,
        }
    }

    pub fn from_m_s(value: f64) -> Self {
        Self {
            value,
            unit: SpeedUnit::MeterPerSecond,
        }
    }

    pub fn kts(&self) -> f64 {
        match &self.unit {
            SpeedUnit::Knot => self.value,
            SpeedUnit::MeterPerSecond => self.value * 3600.0 / METERS_PER_NM,
        }
    }

    pub fn m_s(&self) -> f64 {
        match &self.unit {
            SpeedUnit::Knot => self.value * METERS_PER_NM / 3600.0,
            SpeedUnit::MeterPerSecond => self.value,
        }
    }
}

impl Display for Speed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}kt", self.kts())
    }
}

impl PartialEq<Self> for Speed {
    fn eq(&self, other: &Self) -> bool {
        self.kts().eq(&other.kts())
    }
}

impl PartialOrd<Self> for Speed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.kts().partial_cmp(&other.kts())
    }
}

impl ops::Mul<f64> for Speed {
    type Output = Speed;

    fn mul(self, rhs: f64) -> Self::Output {
        Speed {
            value: self.value * rhs,
            unit: self.unit,
        }
    }
}

impl ops::Mul<Duration> for Speed {
    type Output = Distance;

    fn mul(self, rhs: Duration) -> Self::Output {
        Distance::from_m(self.m_s() * rhs.num_seconds() as f64)
    }
}

impl Serialize for Speed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.kts())
    }
}

impl<'de> Deserialize<'de> for Speed {
    fn deserialize<D>(deserializer: D) -> Result<Speed, D::Error>
    where
        D: Deserializer<'de>,
    {
        f64::deserialize(deserializer).map(Speed::from_kts)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Distance {
    pub(crate) value: f64,
    pub(crate) unit: DistanceUnit,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) enum DistanceUnit {
    Meters,
    #[default]
    NauticalMiles,
}

impl Distance {
    pub fn zero() -> Self {
        Distance {
            value: 0.0,
            unit: DistanceUnit::Meters,
        }
    }

    pub fn from_m(value: f64) -> Self {
        Distance {
            value,
            unit: DistanceUnit::Meters,
        }
    }

    pub fn from_nm(value: f64) -> Self {
        Distance {
            value,
            unit: DistanceUnit::NauticalMiles,
        }
    }

    pub fn m(&self) -> f64 {
        match &self.unit {
            DistanceUnit::Meters => self.value,
            DistanceUnit::NauticalMiles => self.value * METERS_PER_NM,
        }
    }

    pub fn nm(&self) -> f64 {
        match &self.unit {
            DistanceUnit::Meters => self.value / METERS_PER_NM,
            DistanceUnit::NauticalMiles => self.value,
        }
    }
}

impl Display for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.unit {
            DistanceUnit::Meters => write!(f, "{:.0}m", self.value),
            DistanceUnit::NauticalMiles => write!(f, "{:.2}nm", self.value),
        }
    }
}

impl PartialEq<Self> for Distance {
    fn eq(&self, other: &Self) -> bool {
        self.m().eq(&other.m())
    }
}

impl Eq for Distance {}

impl PartialOrd<Self> for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.m().total_cmp(&other.m())
    }
}

impl ops::Add<Distance> for Distance {
    type Output = Self;

    fn add(self, rhs: Distance) -> Self {
        Distance {
            value: self.value
                + match self.unit {
                    DistanceUnit::Meters => rhs.m(),
                    DistanceUnit::NauticalMiles => rhs.nm(),
                },
            unit: self.unit,
        }
    }
}

impl ops::Mul<f64> for Distance {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Distance {
            value: self.value * rhs,
            unit: self.unit,
        }
    }
}

impl ops::Div<Speed> for Distance {
    type Output = Duration;

    fn div(self, rhs: Speed) -> Duration {
        if rhs.m_s() <= 0.0 {
            Duration::max_value()
        } else {
            Duration::seconds((self.m() / rhs.m_s()) as i64)
        }
    }
}

impl Serialize for Distance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.nm())
    }
}

impl<'de> Deserialize<'de> for Distance {
    fn deserialize<D>(deserializer: D) -> Result<Distance, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() {
            return Err(de::Error::custom("distance must be finite"));
        }
        Ok(Distance::from_nm(value))
    }
}

/// Cooperative cancellation shared across the pipeline stages. Cloning hands
/// out another handle on the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_conversions() {
        let s = Speed::from_kts(10.0);
        assert!((s.m_s() - 5.1444).abs() < 1e-3);
        assert!((Speed::from_m_s(s.m_s()).kts() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn distance_over_speed() {
        let d = Distance::from_nm(6.0);
        let s = Speed::from_kts(6.0);
        assert_eq!((d / s).num_seconds(), 3600);
        assert_eq!((d / Speed::from_kts(0.0)), Duration::max_value());
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
