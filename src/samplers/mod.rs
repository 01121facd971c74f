//! Subset samplers.
//!
//! RANSAC, LMedS and MSAC draw uniformly; PROSAC and PROMedS draw from a
//! quality-ordered prefix that grows as trials proceed.

pub mod prosac;
pub mod uniform;

pub use prosac::ProsacSampler;
pub use uniform::UniformRandomSampler;
