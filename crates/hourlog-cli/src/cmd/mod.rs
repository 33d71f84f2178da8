pub mod completions;
pub mod menu;
pub mod merge;
pub mod run;
pub mod schedule;
