use corral_core::error::ValidationError;
use corral_state::StateError;
use thiserror::Error;

pub type DemandResult<T> = Result<T, DemandError>;

#[derive(Debug, Error)]
pub enum DemandError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
