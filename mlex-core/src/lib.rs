//! MLEx Core
//!
//! Core types shared by the registry client and the job worker.
//!
//! This crate contains:
//! - Domain types: Worker descriptors, jobs and their status
//! - DTOs: Request bodies exchanged with the job registry

pub mod domain;
pub mod dto;
