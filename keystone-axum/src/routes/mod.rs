//! Route tables, one per resource

pub mod galleries;
pub mod uploads;
