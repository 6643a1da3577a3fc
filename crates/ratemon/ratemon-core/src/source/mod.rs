//! Rate source implementations.

mod fixture;

pub use fixture::{FixtureDocument, FixtureRateSource, RunFixture};
