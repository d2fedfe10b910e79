pub mod ledger_tests;
pub mod merkle_tests;
pub mod snapshot_tests;
