mod runner_tests;
pub mod util;
