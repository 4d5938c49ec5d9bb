use serde::{Deserialize, Serialize};

use crate::algorithm::spherical::Spherical;
use crate::algorithm::Algorithm;
use crate::error::{Error, Result};
use crate::position::Coords;
use crate::utils::Distance;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPointKind {
    Start,
    Waypoint,
    Mark,
    Gate,
    Finish,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlPoint {
    pub position: Coords,
    pub kind: ControlPointKind,
    #[serde(rename = "widthM", skip_serializing_if = "Option::is_none")]
    pub width_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ControlPoint {
    pub fn start(position: impl Into<Coords>) -> Self {
        Self::new(position, ControlPointKind::Start)
    }

    pub fn waypoint(position: impl Into<Coords>) -> Self {
        Self::new(position, ControlPointKind::Waypoint)
    }

    pub fn mark(position: impl Into<Coords>) -> Self {
        Self::new(position, ControlPointKind::Mark)
    }

    pub fn gate(position: impl Into<Coords>, width_m: f64) -> Self {
        let mut cp = Self::new(position, ControlPointKind::Gate);
        cp.width_m = Some(width_m);
        cp
    }

    pub fn finish(position: impl Into<Coords>) -> Self {
        Self::new(position, ControlPointKind::Finish)
    }

    fn new(position: impl Into<Coords>, kind: ControlPointKind) -> Self {
        ControlPoint {
            position: position.into(),
            kind,
            width_m: None,
            description: None,
        }
    }

    /// Label used in error messages: description when given, index otherwise.
    pub(crate) fn label(&self, index: usize) -> String {
        match &self.description {
            Some(d) => d.clone(),
            None => format!("#{index} ({:?})", self.kind),
        }
    }
}

/// Validated ordered control sequence: one Start first, one Finish last,
/// everything pairwise distinct on the water.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Course {
    control_points: Vec<ControlPoint>,
}

impl Course {
    pub fn new(control_points: Vec<ControlPoint>) -> Result<Self> {
        if control_points.len() < 2 {
            return Err(Error::InvalidInput(
                "a course needs at least a start and a finish".into(),
            ));
        }

        for (i, cp) in control_points.iter().enumerate() {
            cp.position.checked()?;

            match cp.kind {
                ControlPointKind::Start if i != 0 => {
                    return Err(Error::InvalidInput(format!("start at index {i}, expected 0")));
                }
                ControlPointKind::Finish if i != control_points.len() - 1 => {
                    return Err(Error::InvalidInput(format!("finish at index {i} is not last")));
                }
                ControlPointKind::Gate => match cp.width_m {
                    Some(w) if w.is_finite() && w > 0.0 => {}
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "gate {} needs a positive width",
                            cp.label(i)
                        )));
                    }
                },
                _ => {}
            }

            if let Some(w) = cp.width_m {
                if !w.is_finite() || w <= 0.0 {
                    return Err(Error::InvalidInput(format!(
                        "control point {} has invalid width {w}",
                        cp.label(i)
                    )));
                }
            }
        }

        if control_points[0].kind != ControlPointKind::Start {
            return Err(Error::InvalidInput("first control point must be the start".into()));
        }
        if control_points.last().unwrap().kind != ControlPointKind::Finish {
            return Err(Error::InvalidInput("last control point must be the finish".into()));
        }
        let starts = control_points.iter().filter(|c| c.kind == ControlPointKind::Start).count();
        let finishes = control_points.iter().filter(|c| c.kind == ControlPointKind::Finish).count();
        if starts != 1 || finishes != 1 {
            return Err(Error::InvalidInput(format!(
                "exactly one start and one finish required (got {starts} / {finishes})"
            )));
        }

        let algorithm = Spherical {};
        for i in 0..control_points.len() {
            for j in (i + 1)..control_points.len() {
                let d = algorithm.distance_to(&control_points[i].position, &control_points[j].position);
                if d.m() < 1.0 {
                    return Err(Error::InvalidInput(format!(
                        "control points {} and {} coincide",
                        control_points[i].label(i),
                        control_points[j].label(j)
                    )));
                }
            }
        }

        Ok(Course { control_points })
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    pub fn len(&self) -> usize {
        self.control_points.len()
    }

    /// Largest of the latitude and longitude spans, in NM (degrees * 60).
    pub(crate) fn span_nm(&self) -> f64 {
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lon = f64::MAX;
        let mut max_lon = f64::MIN;

        for cp in &self.control_points {
            min_lat = min_lat.min(cp.position.lat);
            max_lat = max_lat.max(cp.position.lat);
            min_lon = min_lon.min(cp.position.lon);
            max_lon = max_lon.max(cp.position.lon);
        }

        (max_lat - min_lat).max(max_lon - min_lon) * 60.0
    }

    /// Shortest rhumb-line leg between adjacent control points.
    pub(crate) fn min_segment(&self) -> Distance {
        let algorithm = Spherical {};
        self.control_points
            .windows(2)
            .map(|w| algorithm.rhumb_distance_to(&w[0].position, &w[1].position))
            .min()
            .unwrap_or_else(Distance::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_finish(a: (f64, f64), b: (f64, f64)) -> Vec<ControlPoint> {
        vec![ControlPoint::start(a), ControlPoint::finish(b)]
    }

    #[test]
    fn accepts_minimal_course() {
        let course = Course::new(start_finish((54.5, 18.5), (54.6, 18.6))).unwrap();
        assert_eq!(course.len(), 2);
        assert!(course.min_segment().nm() > 4.0);
    }

    #[test]
    fn rejects_misplaced_start() {
        let cps = vec![ControlPoint::waypoint((54.5, 18.5)), ControlPoint::finish((54.6, 18.6))];
        assert!(matches!(Course::new(cps), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_duplicate_positions() {
        let cps = vec![
            ControlPoint::start((54.5, 18.5)),
            ControlPoint::mark((54.5, 18.5)),
            ControlPoint::finish((54.6, 18.6)),
        ];
        assert!(matches!(Course::new(cps), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_gate_without_width() {
        let cps = vec![
            ControlPoint::start((54.5, 18.5)),
            ControlPoint::new((54.55, 18.55), ControlPointKind::Gate),
            ControlPoint::finish((54.6, 18.6)),
        ];
        assert!(matches!(Course::new(cps), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_nan_positions() {
        let cps = start_finish((f64::NAN, 18.5), (54.6, 18.6));
        assert!(matches!(Course::new(cps), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn span_and_min_segment() {
        let course = Course::new(vec![
            ControlPoint::start((54.0, 18.0)),
            ControlPoint::mark((54.5, 18.0)),
            ControlPoint::finish((55.0, 18.0)),
        ])
        .unwrap();
        assert!((course.span_nm() - 60.0).abs() < 1e-9);
        assert!((course.min_segment().nm() - 30.0).abs() < 0.1);
    }
}
