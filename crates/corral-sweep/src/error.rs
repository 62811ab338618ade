use corral_provider::ProviderError;
use corral_state::StateError;
use thiserror::Error;

pub type SweepResult<T> = Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
