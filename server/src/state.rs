use std::sync::Arc;

use axum_macros::FromRef;
use shared::{audio_storage::AudioStorage, settings::Settings};

use crate::job::State as JobState;

#[derive(Clone, FromRef)]
pub struct State {
    pub settings: Arc<Settings>,
    pub storage: AudioStorage,
    pub job_state: JobState,
}
