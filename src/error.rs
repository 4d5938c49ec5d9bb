use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::mesh::MeshedAreaId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the pipeline can surface. C3 and C4 fail fast; the router
/// absorbs per-candidate `HorizonExceeded` / `NoNavigablePath` and only
/// surfaces `AllCandidatesInfeasible` when no candidate produced a variant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid polar: {0}")]
    InvalidPolar(String),

    #[error("control point '{name}' cannot be attached to navigable water: {reason}")]
    ControlPointUnreachable { name: String, reason: String },

    #[error("control points '{from}' and '{to}' lie in disconnected sea basins")]
    DisconnectedControlPoints { from: String, to: String },

    #[error("weather unavailable: {0}")]
    WeatherUnavailable(#[source] anyhow::Error),

    #[error("weather provider rate limited")]
    RateLimited,

    #[error("weather provider network error: {0}")]
    NetworkError(#[source] anyhow::Error),

    #[error("geometry unavailable: {0}")]
    GeometryUnavailable(#[source] anyhow::Error),

    #[error("route arrives outside the weather horizon")]
    HorizonExceeded,

    #[error("no navigable path for leg '{from}' -> '{to}' under current weather")]
    NoNavigablePath { from: String, to: String },

    #[error("no departure candidate produced a feasible route")]
    AllCandidatesInfeasible,

    #[error("cancelled")]
    Cancelled,

    #[error("meshed area {0} not found")]
    NotFound(MeshedAreaId),

    #[error("instant {requested} outside weather coverage [{from}, {to}]")]
    OutOfHorizon {
        requested: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl Error {
    /// Maps a port-boundary error back to a typed kind, keeping kinds an
    /// adapter already chose (rate limiting, network) instead of flattening
    /// everything to `WeatherUnavailable`.
    pub(crate) fn from_weather_port(e: anyhow::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(typed) => typed,
            Err(e) => Error::WeatherUnavailable(e),
        }
    }
}
