mod helpers;

mod tests_cascade;
