//! Identity Document Verification Service
//!
//! This library provides the core functionality for the docverify system:
//! image normalization (resize, deskew, denoise, contrast), dispatch to an
//! external field-extraction engine, mandatory-field validation, and result
//! delivery either synchronously or via authenticated callbacks.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
