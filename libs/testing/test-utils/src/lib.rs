//! Shared test fixtures for the dead-letter crates
//!
//! - `TestDatabase`: disposable PostgreSQL container with the workspace
//!   migrations applied
//! - `TestDataBuilder`: deterministic job types, ids and payloads per test
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let data = TestDataBuilder::from_test_name("my_postgres_test");
//!
//!     let job_type = data.job_type("email");
//!     let payload = data.payload(1);
//! }
//! ```

mod postgres;

pub use postgres::TestDatabase;

use serde_json::{Value, json};

/// Seeded test data, so reruns of one test produce identical rows and
/// different tests never collide on a job type.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test's name.
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let data = TestDataBuilder::from_test_name("test_cleanup");
    /// assert_eq!(data.job_type("email"), TestDataBuilder::from_test_name("test_cleanup").job_type("email"));
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Job type scoped to this test, e.g. `email-1234-test`
    pub fn job_type(&self, kind: &str) -> String {
        format!("{}-{}-test", kind, self.seed)
    }

    /// Id the failed job had in its original queue
    pub fn original_job_id(&self, n: u32) -> String {
        format!("job-{}-{}", self.seed, n)
    }

    pub fn payload(&self, n: u32) -> Value {
        json!({
            "seed": self.seed,
            "sequence": n,
            "recipient": format!("user-{}@example.com", n),
        })
    }
}

pub mod assertions {
    use std::fmt::Debug;

    /// Assert that an optional value is Some and hand it back
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that `actual` and `expected` hold the same items, ignoring order
    pub fn assert_same_items<T: Ord + Debug + Clone>(actual: &[T], expected: &[T], context: &str) {
        let mut actual = actual.to_vec();
        let mut expected = expected.to_vec();
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected, "{}", context);
    }
}
