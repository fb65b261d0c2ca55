pub mod callbacks;
pub mod experiment;
pub mod experiment_runner;
pub mod flag_matching;
pub mod flag_matching_utils;
pub mod flag_models;
pub mod flag_repository;
pub mod sticky_bucketing;

#[cfg(test)]
pub mod test_helpers;
