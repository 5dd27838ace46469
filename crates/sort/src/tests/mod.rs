mod helpers;

mod merge_tests;
mod property_tests;
