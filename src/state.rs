use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::DisplayState;

pub type SharedState = Arc<RwLock<DisplayState>>;

pub fn create_state() -> SharedState {
    Arc::new(RwLock::new(DisplayState::default()))
}
