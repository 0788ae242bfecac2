//! Domain types and pure alerting logic for VitalWatch.
//!
//! Nothing in this crate performs I/O beyond reading the rules file at
//! startup. The alert lifecycle, fan-out, and timers live in
//! `vitalwatch-events`.

pub mod alert;
pub mod decision;
pub mod error;
pub mod roles;
pub mod rules;
pub mod types;
pub mod vitals;
pub mod window;
