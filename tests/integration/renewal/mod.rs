mod executor_test;
mod revocation_test;
mod test_utils;
mod validation_test;
