pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod play_order;
pub mod provider;
pub mod queue;
pub mod service;
pub mod tasks {
    pub mod content;
    pub mod metadata;
    pub mod slideshow;
}
