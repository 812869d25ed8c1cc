//! Cooperative elastic scaling of the replica group

pub mod executor;
pub mod scaler;

pub use executor::{KubeScaleApi, MockScaleApi, ScaleApi};
pub use scaler::{desired_for_hint, Scaler};
