use std::time::Instant;

use crate::model::{Candidate, Query, SourceType};
use crate::ranking::rank;

fn p95_ms(samples: &mut [f64]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let last = samples.len().saturating_sub(1);
    let idx = ((last as f64) * 0.95).round() as usize;
    samples[idx.min(last)]
}

#[test]
fn warm_rank_p95_under_25ms() {
    let mut items: Vec<Candidate> = (0..5_000)
        .map(|i| {
            Candidate::from_owned(
                SourceType::File,
                format!("file:///docs/document_{i:05}.txt"),
                format!("Document_{i:05}.txt"),
            )
            .with_usage(i)
        })
        .collect();

    items.push(Candidate::new(
        SourceType::File,
        "file:///reports/q4_report.xlsx",
        "Q4 Report.xlsx",
    ));

    let query = Query::new("q4 rep", 1);
    for _ in 0..30 {
        let _ = rank(items.clone(), &query, true);
    }

    let mut batch_p95 = Vec::with_capacity(5);
    for _ in 0..5 {
        let mut samples = Vec::with_capacity(40);
        for _ in 0..40 {
            let batch = items.clone();
            let start = Instant::now();
            let ranked = rank(batch, &query, true);
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
            assert_eq!(ranked.len(), 1);
        }
        batch_p95.push(p95_ms(&mut samples));
    }

    batch_p95.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_p95 = batch_p95[batch_p95.len() / 2];

    assert!(
        median_p95 <= 25.0,
        "median batch p95 too high: {median_p95:.3}ms (budget 25.0ms); batches={batch_p95:?}",
    );
}
