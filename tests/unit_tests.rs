//! Component-level tests against the public API.

mod unit;
