//! Core orchestration: state, events, page loops and the app itself

pub mod app;
pub mod events;
pub mod pages;
pub mod state;
