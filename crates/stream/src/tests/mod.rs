mod helpers;

mod backend_tests;
