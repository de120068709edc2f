//! Scenario-based tests for prober

mod compile;
mod connections;
mod end_to_end;
mod fail_fast;
mod order_groups;
mod scpi_bench;
mod snapshot;
