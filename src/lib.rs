pub mod algorithm;
pub mod course;
pub mod error;
pub mod land;
pub mod mesh;
pub mod naucrates;
pub mod polar;
pub mod position;
pub mod router;
pub mod utils;
pub mod weather;

pub use error::{Error, Result};
pub use naucrates::Naucrates;
