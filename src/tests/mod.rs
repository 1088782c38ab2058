//! Test module for the import pipeline.
//!
//! - fixtures: deterministic chains and an in-memory peer network
//! - integration: end-to-end walks, fork repair, live tracking, audits
//! - fuzz: random corruptions the auditor must catch, hostile payloads

pub mod integration;
pub mod fuzz;
