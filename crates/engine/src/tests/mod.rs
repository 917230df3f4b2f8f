mod helpers;

mod db_tests;
mod merge_tests;
