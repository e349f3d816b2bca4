//! Core engine: breakout calculation, session tagging, and the scan run
//! that ties them to the series store and the snapshot.

pub mod calculator;
pub mod integrity;
pub mod scanner;

pub use calculator::{check_series, BreakoutCalculator, SeriesCheck};
pub use integrity::IntegrityReport;
pub use scanner::{rank, ScanSummary, Scanner, UnitOutcome, UnitReport};
