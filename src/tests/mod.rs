pub mod matching_tests;
pub mod header_tests;
