//! Carebook: patient and doctor registration service.

pub mod accounts;
pub mod app;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod media;
pub mod navigation;
pub mod registration;
pub mod store;
