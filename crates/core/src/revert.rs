//! Revertible state
//!
//! Components whose state can be touched by an action script expose an
//! opaque image of their state. An executor saves every participant before
//! running a script and restores all of them if any step fails.

use std::any::Any;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque saved state of a component
pub type StateImage = Box<dyn Any + Send + Sync>;

/// Errors restoring a state image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevertError {
    /// The image was produced by a different kind of component
    #[error("State image does not belong to {0}")]
    ImageMismatch(&'static str),
}

/// A component that can save and restore its full state
#[async_trait]
pub trait Revertible: Send + Sync {
    /// Capture the current state
    async fn save_state(&self) -> StateImage;

    /// Replace the current state with a previously captured image
    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError>;
}

/// Recover the concrete state from an image
pub fn downcast_image<T: 'static>(image: StateImage, owner: &'static str) -> Result<T, RevertError> {
    image
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| RevertError::ImageMismatch(owner))
}
