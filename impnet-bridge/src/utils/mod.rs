/// Test doubles and packet builders shared by unit and integration tests.
pub mod test;
