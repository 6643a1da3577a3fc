//! Basic example: fit reference runs, then certify a new run
//!
//! Run with: cargo run --example basic -p ratemon

use ratemon::prelude::*;
use ratemon::{FixtureDocument, RunFixture};

/// `rate = 40 + 9.5·pileup + 0.02·pileup²` with a small alternating wiggle.
fn reference_records(offset: f64) -> Vec<RawRateRecord> {
    (1..=40)
        .map(|ls| {
            let pileup = 20.0 + 0.5 * f64::from(ls) + offset;
            let wiggle = if ls % 2 == 0 { 2.0 } else { -2.0 };
            let rate = 40.0 + 9.5 * pileup + 0.02 * pileup * pileup + wiggle;
            RawRateRecord::new(ls, Some(pileup), rate)
        })
        .collect()
}

fn main() -> Result<()> {
    println!("=== ratemon Basic Example ===\n");

    let mut suspicious = reference_records(2.0);
    for record in suspicious.iter_mut().skip(24).take(3) {
        record.rate *= 1.4;
    }
    let source = FixtureRateSource::new(FixtureDocument::default())
        .with_run(305112, RunFixture::new(1).with_trigger("HLT_IsoMu24", reference_records(0.0)))
        .with_run(305113, RunFixture::new(1).with_trigger("HLT_IsoMu24", reference_records(1.0)))
        .with_run(305200, RunFixture::new(1).with_trigger("HLT_IsoMu24", suspicious));

    let config = RateMonConfig::new()
        .with_triggers(["HLT_IsoMu24"])
        .with_selection(SelectionPolicy::weighted());
    let monitor = RateMonitor::new(config)?;

    // 1. Fit the reference runs
    let fitted = monitor.fit(&source, &[RunId::new(305112), RunId::new(305113)])?;
    println!("1. Fitted models");
    for (trigger, group, model) in fitted.fits.iter() {
        println!(
            "   {} [{}] {:>6}: mse={:.3} coefficients={:?}",
            trigger,
            group,
            model.kind,
            model.residual_mse,
            model
                .coefficients
                .iter()
                .map(|c| format!("{:.4}", c))
                .collect::<Vec<_>>()
        );
    }

    // 2. Certify a new run against them
    let certified = monitor.certify_runs(&source, &[RunId::new(305200)])?;
    println!("\n2. Certification");
    print!("{}", certified.summary());

    Ok(())
}
