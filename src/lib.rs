pub mod config;
pub mod db;
pub mod indices;
pub mod orchestrator;

#[cfg(test)]
mod test_support;

/// Application name for XDG paths
pub const APP_NAME: &str = "soundscape-indices";
