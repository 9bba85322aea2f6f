//! Store test suite

mod table_tests;
