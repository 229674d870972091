pub mod access;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod quiz;
pub mod routes;
pub mod state;
pub mod store;

use tracing::info;

pub fn build_state(config: config::Config) -> anyhow::Result<state::AppState> {
    match config.local_state_path.as_deref() {
        Some(path) => info!("persisting local state to {}", path),
        None => info!("local state persistence disabled"),
    }
    Ok(state::AppState::new(config))
}
