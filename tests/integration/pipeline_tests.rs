//! Vectorization pipeline integration tests.
//!
//! Tests verify:
//! - N references in, N results out, in input order
//! - Failures stay with their own item
//! - The batch deadline bounds slow items
//! - Traced output is sanitized and stable under re-sanitization

use std::time::Duration;

use image::ImageFormat;

use iconforge::error::PipelineError;
use iconforge::pipeline::{
    decode_raster, sanitize, trace_to_svg, RasterReference, TraceOptions, VectorizationPipeline,
};

use super::test_utils::{
    create_icon_image, create_icon_png, create_ring_image, encode, MockImageFetcher,
};

fn references(urls: &[&str]) -> Vec<RasterReference> {
    urls.iter().map(|url| RasterReference::new(*url)).collect()
}

// =============================================================================
// Ordering and Partial Success
// =============================================================================

#[tokio::test]
async fn test_results_keep_input_order() {
    // The first item finishes last.
    let fetcher = MockImageFetcher::new()
        .with_image("https://img/slow.png", create_icon_png())
        .with_delay("https://img/slow.png", Duration::from_millis(300))
        .with_image("https://img/fast.png", create_icon_png())
        .with_image("https://img/medium.png", create_icon_png())
        .with_delay("https://img/medium.png", Duration::from_millis(100));
    let pipeline = VectorizationPipeline::new(fetcher);

    let urls = [
        "https://img/slow.png",
        "https://img/fast.png",
        "https://img/missing.png",
        "https://img/medium.png",
    ];
    let outcome = pipeline
        .vectorize_all(references(&urls), &TraceOptions::default())
        .await;

    assert_eq!(outcome.results.len(), urls.len());
    for (result, url) in outcome.results.iter().zip(urls) {
        assert_eq!(result.source.url, url);
    }

    assert!(outcome.overall_success);
    assert_eq!(outcome.success_count(), 3);
    assert_eq!(outcome.failure_count(), 1);
    assert_eq!(
        outcome.results[2].error(),
        Some(&PipelineError::FetchStatus { status: 404 })
    );
    assert_eq!(pipeline.fetcher().request_count(), 4);
}

#[tokio::test]
async fn test_revised_prompt_is_carried_through() {
    let fetcher = MockImageFetcher::new().with_image("https://img/a.png", create_icon_png());
    let pipeline = VectorizationPipeline::new(fetcher);

    let reference = RasterReference::new("https://img/a.png").with_revised_prompt("a tidy tree");
    let outcome = pipeline
        .vectorize_all(vec![reference.clone()], &TraceOptions::default())
        .await;

    assert_eq!(outcome.results[0].source, reference);
    assert!(outcome.results[0].is_success());
}

#[tokio::test]
async fn test_empty_batch() {
    let pipeline = VectorizationPipeline::new(MockImageFetcher::new());
    let outcome = pipeline.vectorize_all(Vec::new(), &TraceOptions::default()).await;
    assert!(outcome.results.is_empty());
    assert!(!outcome.overall_success);
}

#[tokio::test]
async fn test_invalid_options_fail_every_item() {
    let fetcher = MockImageFetcher::new().with_image("https://img/a.png", create_icon_png());
    let pipeline = VectorizationPipeline::new(fetcher);
    let options = TraceOptions {
        colors: 0,
        ..TraceOptions::default()
    };

    let outcome = pipeline
        .vectorize_all(references(&["https://img/a.png"]), &options)
        .await;
    assert!(matches!(
        outcome.results[0].error(),
        Some(PipelineError::Trace(_))
    ));
}

// =============================================================================
// Deadlines
// =============================================================================

#[tokio::test]
async fn test_batch_deadline_cuts_off_slow_items() {
    let fetcher = MockImageFetcher::new()
        .with_image("https://img/stuck.png", create_icon_png())
        .with_delay("https://img/stuck.png", Duration::from_secs(30))
        .with_image("https://img/ok.png", create_icon_png());
    let pipeline =
        VectorizationPipeline::new(fetcher).with_batch_timeout(Duration::from_millis(500));

    let started = std::time::Instant::now();
    let outcome = pipeline
        .vectorize_all(
            references(&["https://img/stuck.png", "https://img/ok.png"]),
            &TraceOptions::default(),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        outcome.results[0].error(),
        Some(PipelineError::DeadlineExceeded { .. })
    ));
    assert!(outcome.results[1].is_success());
    assert!(outcome.overall_success);
}

// =============================================================================
// Tracing and Sanitization
// =============================================================================

#[tokio::test]
async fn test_vectorize_one_produces_clean_svg() {
    let fetcher = MockImageFetcher::new().with_image(
        "https://img/ring.png",
        encode(&create_ring_image(48), ImageFormat::Png),
    );
    let pipeline = VectorizationPipeline::new(fetcher);

    let svg = pipeline
        .vectorize_one(
            &RasterReference::new("https://img/ring.png"),
            &TraceOptions::default(),
        )
        .await
        .unwrap();

    assert!(svg.starts_with("<svg"));
    assert!(svg.contains(r#"viewBox="0 0 48 48""#));
    assert!(svg.contains(r#"fill="rgb(0,0,0)""#));
    assert!(svg.contains(r#"fill-rule="evenodd""#));
    assert!(svg.trim_end().ends_with("</svg>"));
}

#[test]
fn test_jpeg_input_traces() {
    let bytes = encode(&create_icon_image(32), ImageFormat::Jpeg);
    let raster = decode_raster(&bytes).unwrap();
    assert_eq!(raster.dimensions(), (32, 32));

    let options = TraceOptions {
        colors: 2,
        ..TraceOptions::default()
    };
    let svg = trace_to_svg(&raster, &options).unwrap();
    assert!(svg.contains("<path"));
}

#[test]
fn test_tracing_is_deterministic() {
    let raster = create_ring_image(40);
    let options = TraceOptions::default();
    assert_eq!(
        trace_to_svg(&raster, &options).unwrap(),
        trace_to_svg(&raster, &options).unwrap()
    );
}

#[test]
fn test_traced_output_is_sanitizer_fixpoint() {
    let svg = trace_to_svg(&create_ring_image(40), &TraceOptions::default()).unwrap();
    let once = sanitize(&svg).unwrap();
    let twice = sanitize(&once).unwrap();
    assert_eq!(once, twice);
    // Tracer output has nothing to strip.
    assert_eq!(once, svg);
}

#[test]
fn test_hostile_markup_is_neutralized() {
    let hostile = concat!(
        r#"<svg xmlns="http://www.w3.org/2000/svg">"#,
        r#"<image href="x.png" onload="steal()"/>"#,
        r#"<!-- note --><scr<script>x</script>ipt>alert(1)</script>"#,
        r#"<g onclick="steal()"><path d="M0 0"/></g>"#,
        r#"<rect style="width: expression(alert(1)); background: url(javascript:x)"/>"#,
        r#"<path d="M 1 1 L 2 2 Z"/>"#,
        "</svg>"
    );

    let clean = sanitize(hostile).unwrap();
    let lower = clean.to_ascii_lowercase();
    assert!(!lower.contains("<script"));
    assert!(!lower.contains("onload"));
    assert!(!lower.contains("onclick"));
    assert!(!lower.contains("<!--"));
    assert!(clean.contains("SAFE_EXPRESSION("));
    assert!(clean.contains("SAFE_URL("));
    assert!(clean.contains(r#"<path d="M 1 1 L 2 2 Z"/>"#));

    assert_eq!(sanitize(&clean).unwrap(), clean);
}
